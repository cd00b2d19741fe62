//! Process-wide debug flags, parsed once from `FEEDBACKD_DEBUG`.

use once_cell::sync::Lazy;
use std::env;

pub const DEBUG_ENV_VAR: &str = "FEEDBACKD_DEBUG";

/// Export the Haptic interface even without a motor.
pub const FLAG_FORCE_HAPTIC: u32 = 1 << 0;

static DEBUG_FLAGS: Lazy<u32> =
    Lazy::new(|| parse_flags(&env::var(DEBUG_ENV_VAR).unwrap_or_default()));

/// Whether haptics are forced on despite missing hardware.
pub fn force_haptic() -> bool {
    *DEBUG_FLAGS & FLAG_FORCE_HAPTIC != 0
}

fn parse_flags(value: &str) -> u32 {
    let mut flags = 0;
    for token in value.split([',', ':', ';', ' ']).filter(|t| !t.is_empty()) {
        match token {
            "force-haptic" => flags |= FLAG_FORCE_HAPTIC,
            "all" => flags = u32::MAX,
            unknown => log::warn!("Unknown debug flag '{unknown}'"),
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_tokens() {
        assert_eq!(parse_flags(""), 0);
        assert_eq!(parse_flags("force-haptic"), FLAG_FORCE_HAPTIC);
        assert_eq!(parse_flags("bogus,force-haptic"), FLAG_FORCE_HAPTIC);
        assert_eq!(parse_flags("all"), u32::MAX);
    }
}
