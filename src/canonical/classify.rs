use once_cell::sync::Lazy;
use regex::Regex;

static DND_OFF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(dnd|do not disturb)\b.*\b(off|end(ed)?|removed|cleared|lifted)\b")
        .expect("valid dnd-off pattern")
});

static DND_ON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(dnd|do not disturb)\b").expect("valid dnd-on pattern"));

static REFUSAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(refus(ed|ing|al)|declin(ed|ing))\b.*\b(service|housekeeping|clean(ing)?|entry)\b")
        .expect("valid refusal pattern")
});

static SUPPLY_QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b\d+\s+(towel|pillow|blanket|sheet|robe|soap|shampoo|toiletr|water|cup|glass)",
    )
    .expect("valid supply pattern")
});

static REQUEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(please|request(ed|ing)?|need(s|ed)?|asking|asked for|bring|deliver)\b")
        .expect("valid request pattern")
});

/// Classify free-text housekeeping notes into a canonical event type.
///
/// Secondary inference path used only when the vendor event type has no
/// synonym mapping. More specific patterns are checked first so "guest
/// refused cleaning, please reschedule" lands on the refusal, not the
/// generic request.
pub fn classify_notes(notes: &str) -> Option<&'static str> {
    if DND_OFF.is_match(notes) {
        return Some("DND_OFF");
    }
    if DND_ON.is_match(notes) {
        return Some("DND_ON");
    }
    if REFUSAL.is_match(notes) {
        return Some("SERVICE_REFUSED");
    }
    if SUPPLY_QUANTITY.is_match(notes) {
        return Some("SUPPLY_REQUEST");
    }
    if REQUEST.is_match(notes) {
        return Some("GUEST_REQUEST");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_supply_quantity_mentions() {
        assert_eq!(classify_notes("guest wants 2 towels"), Some("SUPPLY_REQUEST"));
        assert_eq!(classify_notes("3 pillows to 304"), Some("SUPPLY_REQUEST"));
    }

    #[test]
    fn detects_explicit_request_language() {
        assert_eq!(
            classify_notes("please restock the minibar"),
            Some("GUEST_REQUEST")
        );
        assert_eq!(classify_notes("guest asked for late checkout"), Some("GUEST_REQUEST"));
    }

    #[test]
    fn detects_dnd_start_and_end() {
        assert_eq!(classify_notes("do not disturb until noon"), Some("DND_ON"));
        assert_eq!(classify_notes("DND sign removed"), Some("DND_OFF"));
        assert_eq!(classify_notes("dnd cleared by guest"), Some("DND_OFF"));
    }

    #[test]
    fn detects_refusal_language() {
        assert_eq!(
            classify_notes("guest refused housekeeping today"),
            Some("SERVICE_REFUSED")
        );
        assert_eq!(
            classify_notes("declined cleaning, please retry tomorrow"),
            Some("SERVICE_REFUSED")
        );
    }

    #[test]
    fn refusal_wins_over_generic_request() {
        assert_eq!(
            classify_notes("guest refused cleaning, please reschedule"),
            Some("SERVICE_REFUSED")
        );
    }

    #[test]
    fn plain_notes_are_unclassified() {
        assert_eq!(classify_notes("room in good condition"), None);
        assert_eq!(classify_notes(""), None);
    }
}
