use crate::profile::{PlaneFrame, Profile2d};
use crate::types::{KernelError, MassProperties, PrimitiveSpec, RenderMesh, SolidBrep};
use crate::validate::ValidationReport;

/// The geometry kernel capability surface the core is built against.
///
/// Everything above this trait owns entity semantics, workspaces and
/// dispatch; everything below it is geometry. `NativeKernel` is the
/// built-in implementation; an exact-brep backend can be swapped in
/// without touching the pipeline.
pub trait Kernel: Send + Sync {
    /// Linear extrusion of a closed profile along a direction vector.
    fn extrude(
        &self,
        profile: &Profile2d,
        frame: &PlaneFrame,
        direction: [f64; 3],
        distance: f64,
    ) -> Result<SolidBrep, KernelError>;

    /// Revolution of a closed profile around an axis by `angle` radians.
    fn revolve(
        &self,
        profile: &Profile2d,
        frame: &PlaneFrame,
        axis_origin: [f64; 3],
        axis_direction: [f64; 3],
        angle: f64,
    ) -> Result<SolidBrep, KernelError>;

    /// Loft through an ordered sequence of closed profiles.
    fn loft(
        &self,
        sections: &[(Profile2d, PlaneFrame)],
        ruled: bool,
        cap_ends: bool,
    ) -> Result<SolidBrep, KernelError>;

    /// Sweep a profile along a G¹-continuous polyline path.
    fn sweep(
        &self,
        profile: &Profile2d,
        path: &[[f64; 3]],
    ) -> Result<SolidBrep, KernelError>;

    /// Construct a primitive solid.
    fn primitive(&self, spec: &PrimitiveSpec) -> Result<SolidBrep, KernelError>;

    /// Boolean union.
    fn fuse(&self, a: &SolidBrep, b: &SolidBrep) -> Result<SolidBrep, KernelError>;

    /// Boolean subtraction, `a` minus `b`.
    fn cut(&self, a: &SolidBrep, b: &SolidBrep) -> Result<SolidBrep, KernelError>;

    /// Boolean intersection.
    fn common(&self, a: &SolidBrep, b: &SolidBrep) -> Result<SolidBrep, KernelError>;

    /// Rigid transform (row-major rotation + translation).
    fn transformed(
        &self,
        solid: &SolidBrep,
        rotation: &[[f64; 3]; 3],
        translation: [f64; 3],
    ) -> SolidBrep;

    /// Reflection across a plane, keeping outward orientation.
    fn mirrored(
        &self,
        solid: &SolidBrep,
        plane_point: [f64; 3],
        plane_normal: [f64; 3],
    ) -> SolidBrep;

    /// Volume, surface area and centre of mass.
    fn mass_properties(&self, solid: &SolidBrep) -> MassProperties;

    /// Full topology validation.
    fn validate(&self, solid: &SolidBrep) -> ValidationReport;

    /// Triangle mesh for export, parameterised by deflection targets.
    fn tessellate(
        &self,
        solid: &SolidBrep,
        linear_deflection: f64,
        angular_deflection: f64,
    ) -> RenderMesh;

    /// Stable byte serialization of a brep.
    fn encode_brep(&self, solid: &SolidBrep) -> Result<Vec<u8>, KernelError>;

    /// Inverse of `encode_brep`.
    fn decode_brep(&self, bytes: &[u8]) -> Result<SolidBrep, KernelError>;
}
