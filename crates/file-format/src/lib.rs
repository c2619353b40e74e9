//! Interchange codecs for the modeling core: triangulated mesh exchange
//! (binary and ASCII STL) and the exact brep JSON format.

pub mod brep_json;
pub mod errors;
pub mod stl;

pub use brep_json::{load_brep_json, save_brep_json, BREP_FORMAT_VERSION};
pub use errors::FormatError;
pub use stl::{export_ascii_stl, export_binary_stl, import_stl, solid_from_triangles};
