//! Property tests over the native kernel: analytic mass properties,
//! validation invariants and rigid-motion preservation.

use proptest::prelude::*;

use geom_kernel::{mesh, validate, Kernel, NativeKernel, PlaneFrame, PrimitiveSpec, Profile2d};

fn kernel() -> NativeKernel {
    // Coarse resolution keeps the property runs fast.
    NativeKernel::new(64)
}

proptest! {
    #[test]
    fn box_mass_properties_match_analytic(
        w in 0.1f64..50.0,
        h in 0.1f64..50.0,
        d in 0.1f64..50.0,
    ) {
        let solid = kernel()
            .primitive(&PrimitiveSpec::Box {
                corner: [0.0, 0.0, 0.0],
                dimensions: [w, h, d],
            })
            .unwrap();
        let mp = mesh::mass_properties(&solid);
        prop_assert!((mp.volume - w * h * d).abs() < 1e-6 * w * h * d + 1e-9);
        let area = 2.0 * (w * h + w * d + h * d);
        prop_assert!((mp.surface_area - area).abs() < 1e-6 * area);
        prop_assert!(validate::validate(&solid).valid());
    }

    #[test]
    fn extruded_rectangle_volume_is_area_times_depth(
        w in 0.5f64..20.0,
        h in 0.5f64..20.0,
        depth in 0.5f64..20.0,
    ) {
        let profile = Profile2d::rectangle(0.0, 0.0, w, h);
        let solid = kernel()
            .extrude(&profile, &PlaneFrame::xy(), [0.0, 0.0, 1.0], depth)
            .unwrap();
        let mp = mesh::mass_properties(&solid);
        prop_assert!((mp.volume - w * h * depth).abs() < 1e-6 * w * h * depth);
        prop_assert_eq!(solid.face_count(), 6);
    }

    #[test]
    fn rigid_motion_preserves_mass_properties(
        angle in 0.0f64..std::f64::consts::TAU,
        tx in -100.0f64..100.0,
        ty in -100.0f64..100.0,
    ) {
        let k = kernel();
        let solid = k
            .primitive(&PrimitiveSpec::Box {
                corner: [1.0, 2.0, 3.0],
                dimensions: [4.0, 2.0, 1.0],
            })
            .unwrap();
        let rotation = mesh::rotation_matrix([0.0, 0.0, 1.0], angle);
        let moved = k.transformed(&solid, &rotation, [tx, ty, 0.0]);
        let before = mesh::mass_properties(&solid);
        let after = mesh::mass_properties(&moved);
        prop_assert!((before.volume - after.volume).abs() < 1e-6);
        prop_assert!((before.surface_area - after.surface_area).abs() < 1e-6);
    }

    #[test]
    fn brep_codec_round_trips(
        w in 0.1f64..10.0,
        h in 0.1f64..10.0,
    ) {
        let k = kernel();
        let solid = k
            .primitive(&PrimitiveSpec::Cylinder {
                base: [0.0, 0.0, 0.0],
                axis: [0.0, 0.0, 1.0],
                radius: w,
                height: h,
            })
            .unwrap();
        let bytes = k.encode_brep(&solid).unwrap();
        let back = k.decode_brep(&bytes).unwrap();
        prop_assert_eq!(&solid, &back);
    }
}
