//! Error code table: maps the panel's 3-character error code to a
//! human-readable message in English or German, per §4.3 and §6.
//!
//! The lookup recognises the nine codes the panel actually reports
//! (`display2Error`'s low three bytes of the confirmed error word) plus
//! a literal `"EXX"` catch-all entry, mirroring the reference firmware's
//! own `ERROR::TEXT` table (which carries a tenth `CODE_OTHER`/`EN_OTHER`/
//! `DE_OTHER` row even though its own `getErrorMessage` never reaches it —
//! that function only matches against the nine real codes and otherwise
//! echoes the raw code back). This catalogue makes `"EXX"` addressable
//! directly instead of leaving it as dead table data.

/// Which language to render an error message in. `Code` is the reference
/// firmware's own `LANG::CODE == 0` — "render" it by just returning the
/// code unchanged, the fallback every caller gets for an unrecognised
/// code regardless of which language they asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lang {
    Code,
    En,
    De,
}

struct Entry {
    code: &'static str,
    en: &'static str,
    de: &'static str,
}

const TABLE: &[Entry] = &[
    Entry {
        code: "E90",
        en: "no water flow",
        de: "kein Wasserdurchfluss",
    },
    Entry {
        code: "E91",
        en: "salt level too low",
        de: "niedriges Salzniveau",
    },
    Entry {
        code: "E92",
        en: "salt level too high",
        de: "hohes Salzniveau",
    },
    Entry {
        code: "E94",
        en: "water temp too low",
        de: "Wassertemperatur zu niedrig",
    },
    Entry {
        code: "E95",
        en: "water temp too high",
        de: "Wassertemperatur zu hoch",
    },
    Entry {
        code: "E96",
        en: "system error",
        de: "Systemfehler",
    },
    Entry {
        code: "E97",
        en: "dry fire protection",
        de: "Trocken-Brandschutz",
    },
    Entry {
        code: "E99",
        en: "water temp sensor error",
        de: "Wassertemperatursensor defekt",
    },
    Entry {
        code: "END",
        en: "heating aborted after 72h",
        de: "Heizbetrieb nach 72 h deaktiviert",
    },
    Entry {
        code: "EXX",
        en: "error",
        de: "Störung",
    },
];

/// Look up the message for a 3-character error code (e.g. `b"E90"`).
/// `Lang::Code` always returns the code itself, unchanged. For `En`/`De`,
/// returns `None` for a code the table doesn't recognise, matching the
/// reference firmware's fallback of displaying the raw code.
pub fn message(code: [u8; 3], lang: Lang) -> Option<&'static str> {
    match lang {
        Lang::Code => core::str::from_utf8(&code).ok(),
        Lang::En => TABLE.iter().find(|e| e.code.as_bytes() == code).map(|e| e.en),
        Lang::De => TABLE.iter().find(|e| e.code.as_bytes() == code).map(|e| e.de),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_code_resolves_in_both_languages() {
        assert_eq!(message(*b"E90", Lang::En), Some("no water flow"));
        assert_eq!(message(*b"E90", Lang::De), Some("kein Wasserdurchfluss"));
    }

    #[test]
    fn heating_abort_code_is_the_literal_end_marker() {
        assert_eq!(message(*b"END", Lang::En), Some("heating aborted after 72h"));
    }

    #[test]
    fn unrecognised_code_resolves_to_none() {
        assert_eq!(message(*b"E93", Lang::En), None);
    }

    #[test]
    fn catchall_code_is_directly_addressable() {
        assert_eq!(message(*b"EXX", Lang::En), Some("error"));
        assert_eq!(message(*b"EXX", Lang::De), Some("Störung"));
    }

    #[test]
    fn code_language_echoes_the_code_unchanged_even_when_unrecognised() {
        assert_eq!(message(*b"E93", Lang::Code), Some("E93"));
        assert_eq!(message(*b"E90", Lang::Code), Some("E90"));
    }
}
