//! `name,zone` records printed by `gcloud ... --format="value[separator=','](name,zone)"`.

use crate::error::DriverError;
use crate::exec::RenderContext;

/// A compute resource identified by name and zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameZone {
    /// Resource name.
    pub name: String,
    /// Zone the resource lives in.
    pub zone: String,
}

impl NameZone {
    /// Parses one `name,zone` line.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MalformedRecord`] unless the line has exactly
    /// two non-empty fields.
    pub fn parse(kind: &'static str, raw: &str) -> Result<Self, DriverError> {
        let mut fields = raw.trim().split(',').map(str::trim);
        match (fields.next(), fields.next(), fields.next()) {
            (Some(name), Some(zone), None) if !name.is_empty() && !zone.is_empty() => Ok(Self {
                name: name.to_string(),
                zone: zone.to_string(),
            }),
            _ => Err(DriverError::malformed(kind, raw)),
        }
    }

    /// Returns `base` extended with `Name` and `Zone`.
    #[must_use]
    pub fn context(&self, base: &RenderContext) -> RenderContext {
        base.clone()
            .with("Name", self.name.as_str())
            .with("Zone", self.zone.as_str())
    }
}

/// Parses every line, failing on the first malformed one.
///
/// # Errors
///
/// Returns [`DriverError::MalformedRecord`] carrying the offending line.
pub fn parse_all(kind: &'static str, lines: &[String]) -> Result<Vec<NameZone>, DriverError> {
    lines.iter().map(|line| NameZone::parse(kind, line)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        let record = NameZone::parse("disk", "gke-ci-pvc-1,europe-west1-b").unwrap();
        assert_eq!(record.name, "gke-ci-pvc-1");
        assert_eq!(record.zone, "europe-west1-b");
    }

    #[test]
    fn test_malformed_records() {
        for raw in ["nozone", "a,b,c", ",europe-west1-b", "name,"] {
            let err = NameZone::parse("instance", raw).unwrap_err();
            assert!(
                matches!(&err, DriverError::MalformedRecord { kind: "instance", raw: r } if r == raw),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_all_stops_at_first_bad_line() {
        let lines = vec![
            String::from("n1,z1"),
            String::from("broken"),
            String::from("n3,z3"),
        ];
        let err = parse_all("disk", &lines).unwrap_err();
        assert!(err.to_string().contains("\"broken\""));
    }

    #[test]
    fn test_context_layers_on_base() {
        let base = RenderContext::new().with("GCloudProject", "p");
        let ctx = NameZone::parse("instance", "n1,z1").unwrap().context(&base);
        assert_eq!(ctx.get("Name"), Some("n1"));
        assert_eq!(ctx.get("Zone"), Some("z1"));
        assert_eq!(ctx.get("GCloudProject"), Some("p"));
        assert_eq!(base.get("Name"), None);
    }
}
