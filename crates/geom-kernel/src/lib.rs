pub mod csg;
pub mod mesh;
pub mod native;
pub mod profile;
pub mod traits;
pub mod types;
pub mod validate;

pub use native::NativeKernel;
pub use profile::{PlaneFrame, Profile2d, ProfileEdge};
pub use traits::Kernel;
pub use types::{
    FaceInfo, FaceRange, KernelError, MassProperties, PrimitiveSpec, RenderMesh, SolidBrep,
    SurfaceClass, Triangle,
};
pub use validate::ValidationReport;
