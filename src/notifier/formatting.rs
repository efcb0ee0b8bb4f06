use crate::model::Severity;

/// A channel-agnostic rendering of an alert or digest, produced once and handed to every
/// configured channel's formatter. Keeps the payload model identical across channels; only
/// the wire shape differs.
#[derive(Debug, Clone)]
pub struct MessagePayload {
    pub title: String,
    pub body: String,
    pub severity: Option<Severity>,
}

/// Maps a severity to a presentation token pair. Color is a hex string suitable for a chat
/// attachment; glyph is a short unicode marker suitable for plain text.
pub fn severity_presentation(severity: Severity) -> (&'static str, &'static str) {
    match severity {
        Severity::Low => ("#36a64f", "ℹ"),
        Severity::Medium => ("#f2c744", "▲"),
        Severity::High => ("#e8762c", "⚠"),
        Severity::Critical => ("#d33d3d", "✖"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_severity_maps_to_red() {
        let (color, glyph) = severity_presentation(Severity::Critical);
        assert_eq!(color, "#d33d3d");
        assert_eq!(glyph, "✖");
    }
}
