//! Exact-geometry exchange: the brep serialized inside a versioned JSON
//! envelope. Round-trips are lossless.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use geom_kernel::SolidBrep;

use crate::errors::FormatError;

/// Current envelope version.
pub const BREP_FORMAT_VERSION: u32 = 1;

const FORMAT_NAME: &str = "anvil-brep";

#[derive(Debug, Serialize, Deserialize)]
struct BrepFile {
    format: String,
    version: u32,
    name: String,
    exported_at: chrono::DateTime<Utc>,
    solid: SolidBrep,
}

/// Serialize a solid into the exchange envelope.
pub fn save_brep_json(solid: &SolidBrep, name: &str) -> String {
    let file = BrepFile {
        format: FORMAT_NAME.to_string(),
        version: BREP_FORMAT_VERSION,
        name: name.to_string(),
        exported_at: Utc::now(),
        solid: solid.clone(),
    };
    serde_json::to_string(&file).expect("brep serialization should never fail")
}

/// Parse the exchange envelope back into a solid.
pub fn load_brep_json(text: &str) -> Result<SolidBrep, FormatError> {
    let file: BrepFile = serde_json::from_str(text).map_err(|e| FormatError::Import {
        reason: e.to_string(),
    })?;
    if file.format != FORMAT_NAME {
        return Err(FormatError::Unsupported {
            format: file.format,
        });
    }
    if file.version > BREP_FORMAT_VERSION {
        return Err(FormatError::Import {
            reason: format!(
                "file version {} is newer than supported version {BREP_FORMAT_VERSION}",
                file.version
            ),
        });
    }
    Ok(file.solid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geom_kernel::{NativeKernel, PrimitiveSpec};

    #[test]
    fn round_trip_is_lossless() {
        let solid = NativeKernel::default()
            .primitive_brep(&PrimitiveSpec::Sphere {
                center: [1.0, 2.0, 3.0],
                radius: 4.0,
            })
            .unwrap();
        let text = save_brep_json(&solid, "sphere");
        let back = load_brep_json(&text).unwrap();
        assert_eq!(solid, back);
    }

    #[test]
    fn wrong_format_rejected() {
        let text = r#"{"format":"step","version":1,"name":"x","exported_at":"2026-01-01T00:00:00Z","solid":{"positions":[],"triangles":[],"faces":[]}}"#;
        assert!(matches!(
            load_brep_json(text),
            Err(FormatError::Unsupported { .. })
        ));
    }

    #[test]
    fn future_version_rejected() {
        let text = r#"{"format":"anvil-brep","version":99,"name":"x","exported_at":"2026-01-01T00:00:00Z","solid":{"positions":[],"triangles":[],"faces":[]}}"#;
        assert!(matches!(
            load_brep_json(text),
            Err(FormatError::Import { .. })
        ));
    }
}
