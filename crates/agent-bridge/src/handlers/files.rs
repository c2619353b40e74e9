//! Import and export codecs: triangulated mesh exchange (STL, binary and
//! ASCII) plus the exact brep JSON format. Export reports the deviation
//! between the tessellated mesh and the cached exact properties.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use anvil_types::{ComputedProps, CoreError, CoreResult, EntityId, PropertySet, UndoPayload};
use geom_kernel::Kernel;
use file_format::{
    export_ascii_stl, export_binary_stl, import_stl, load_brep_json, save_brep_json,
    solid_from_triangles, FormatError,
};

use crate::dispatch::Ctx;
use crate::messages::parse_params;

fn format_error(e: FormatError) -> CoreError {
    match e {
        FormatError::Unsupported { format } => CoreError::UnsupportedFormat { format },
        FormatError::Import { reason } => CoreError::ImportFailed { reason },
        FormatError::Export { reason } => CoreError::OperationInvalid { reason },
        FormatError::Io(e) => CoreError::ImportFailed {
            reason: e.to_string(),
        },
    }
}

#[derive(Deserialize)]
struct ExportParams {
    entity_id: EntityId,
    format: String,
    #[serde(default)]
    path: Option<PathBuf>,
}

pub fn export(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: ExportParams = parse_params(&ctx.params)?;
    let (slot, _ws) = ctx.active_slot()?;
    let state = slot.state.lock();
    let record = state.get_entity(&p.entity_id)?;
    let PropertySet::Solid { brep } = &record.properties else {
        return Err(CoreError::invalid_parameter(
            "entity_id",
            &p.entity_id,
            "a solid entity",
            None,
        ));
    };
    let solid = ctx
        .core
        .kernel
        .decode_brep(brep)
        .map_err(|e| CoreError::GeometryEngineError {
            message: e.to_string(),
        })?;

    let config = &ctx.core.store.config;
    let mesh = ctx
        .core
        .kernel
        .tessellate(&solid, config.linear_deflection, config.angular_deflection);
    let name = record.id.to_string();

    let bytes = match p.format.as_str() {
        "stl" => export_binary_stl(&mesh, &name).map_err(format_error)?,
        "stl_ascii" => export_ascii_stl(&mesh, &name)
            .map_err(format_error)?
            .into_bytes(),
        "brep_json" => save_brep_json(&solid, &name).into_bytes(),
        other => {
            return Err(CoreError::UnsupportedFormat {
                format: other.to_string(),
            })
        }
    };
    ctx.check_deadline()?;

    // Tessellation fidelity: compare the mesh's integral properties with
    // the cached exact values.
    let mesh_mass = ctx.core.kernel.mass_properties(&solid);
    let volume_error = record
        .computed
        .volume
        .map(|v| (v - mesh_mass.volume).abs())
        .unwrap_or(0.0);
    let area_error = record
        .computed
        .surface_area
        .map(|a| (a - mesh_mass.surface_area).abs())
        .unwrap_or(0.0);

    let mut result = json!({
        "entity_id": record.id,
        "format": p.format,
        "byte_count": bytes.len(),
        "triangle_count": mesh.triangle_count(),
        "volume": mesh_mass.volume,
        "surface_area": mesh_mass.surface_area,
        "volume_error": volume_error,
        "surface_area_error": area_error,
    });
    let map = result.as_object_mut().expect("result is an object");
    match &p.path {
        Some(path) => {
            std::fs::write(path, &bytes).map_err(|e| CoreError::FileNotFound {
                path: format!("{}: {e}", path.display()),
            })?;
            map.insert("path".into(), json!(path));
        }
        None => {
            map.insert("data".into(), json!(BASE64.encode(&bytes)));
        }
    }
    Ok(result)
}

#[derive(Deserialize)]
struct ImportParams {
    format: String,
    #[serde(default)]
    path: Option<PathBuf>,
    /// Base64 payload when the file rides inline.
    #[serde(default)]
    data: Option<String>,
}

pub fn import(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: ImportParams = parse_params(&ctx.params)?;
    let bytes = match (&p.path, &p.data) {
        (Some(path), _) => std::fs::read(path).map_err(|_| CoreError::FileNotFound {
            path: path.display().to_string(),
        })?,
        (None, Some(data)) => BASE64.decode(data).map_err(|e| CoreError::ImportFailed {
            reason: format!("base64 payload: {e}"),
        })?,
        (None, None) => {
            return Err(CoreError::MissingParameter {
                field: "path".to_string(),
            })
        }
    };

    let solid = match p.format.as_str() {
        "stl" | "stl_ascii" => {
            let triangles = import_stl(&bytes).map_err(format_error)?;
            solid_from_triangles(&triangles)
        }
        "brep_json" => {
            let text = String::from_utf8(bytes).map_err(|e| CoreError::ImportFailed {
                reason: e.to_string(),
            })?;
            load_brep_json(&text).map_err(format_error)?
        }
        other => {
            return Err(CoreError::UnsupportedFormat {
                format: other.to_string(),
            })
        }
    };
    ctx.check_deadline()?;

    let report = ctx.core.kernel.validate(&solid);
    if !report.valid() {
        return Err(CoreError::ImportFailed {
            reason: format!("imported mesh fails topology validation: {:?}", report.codes),
        });
    }
    let mass = ctx.core.kernel.mass_properties(&solid);
    let bbox = geom_kernel::mesh::bounding_box(&solid);
    let bytes = ctx
        .core
        .kernel
        .encode_brep(&solid)
        .map_err(|e| CoreError::GeometryEngineError {
            message: e.to_string(),
        })?;

    let (slot, _ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();
    let record = state.create_entity(
        PropertySet::Solid { brep: bytes },
        &ctx.agent_id(),
        ctx.core.store.config.entity_cap,
    )?;
    state.set_computed(
        &record.id,
        ComputedProps {
            volume: Some(mass.volume),
            surface_area: Some(mass.surface_area),
            length: None,
            center_of_mass: Some(mass.center_of_mass),
            face_count: Some(solid.face_count()),
            bbox,
            valid: true,
        },
    )?;
    ctx.record_success(
        &mut state,
        vec![record.id.clone()],
        Some(UndoPayload::CreatedEntity {
            id: record.id.clone(),
        }),
        false,
    );

    Ok(json!({
        "entity_id": record.id,
        "entity_type": "solid",
        "format": p.format,
        "volume": mass.volume,
        "surface_area": mass.surface_area,
        "face_count": solid.face_count(),
    }))
}
