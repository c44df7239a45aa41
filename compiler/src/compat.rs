//! Type compatibility: decides whether a source port's rate may drive a
//! sink port, per spec.md §4.2.

use daw_core::Rate;

/// Rule order matters for readability but not for correctness; every rule
/// is evaluated independently.
pub fn compatible(source_rate: Rate, sink_rate: Rate, accepted_rates: &[Rate]) -> bool {
    // String and ftable rates never promote: only an exact match works.
    if matches!(source_rate, Rate::String | Rate::Ftable)
        || matches!(sink_rate, Rate::String | Rate::Ftable)
    {
        return source_rate == sink_rate;
    }

    // 1. Exact rate match is always compatible.
    if source_rate == sink_rate {
        return true;
    }

    // 2. Init may drive control when the sink declares no explicit
    //    accepted-rate set.
    if source_rate == Rate::Init && sink_rate == Rate::Control && accepted_rates.is_empty() {
        return true;
    }

    // 3. Otherwise the source rate must appear in the sink's accepted-rate
    //    set.
    accepted_rates.contains(&source_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_always_compatible() {
        assert!(compatible(Rate::Audio, Rate::Audio, &[]));
        assert!(compatible(Rate::Control, Rate::Control, &[]));
    }

    #[test]
    fn init_drives_control_without_explicit_accept_list() {
        assert!(compatible(Rate::Init, Rate::Control, &[]));
    }

    #[test]
    fn init_does_not_drive_control_when_accept_list_excludes_it() {
        assert!(!compatible(Rate::Init, Rate::Control, &[Rate::Audio]));
    }

    #[test]
    fn accepted_rate_set_is_honored() {
        assert!(compatible(Rate::Init, Rate::Audio, &[Rate::Init]));
        assert!(!compatible(Rate::Control, Rate::Audio, &[Rate::Init]));
    }

    #[test]
    fn string_and_ftable_never_promote() {
        assert!(!compatible(Rate::Init, Rate::String, &[Rate::Init]));
        assert!(!compatible(Rate::String, Rate::Init, &[]));
        assert!(!compatible(Rate::Ftable, Rate::Audio, &[Rate::Ftable]));
        assert!(compatible(Rate::String, Rate::String, &[]));
    }

    #[test]
    fn audio_never_drives_init() {
        assert!(!compatible(Rate::Audio, Rate::Init, &[]));
    }
}
