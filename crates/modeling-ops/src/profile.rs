//! Profile extraction: turning stored curve entities (or a sketch binding
//! them) into a closed planar profile plus its plane frame.

use anvil_types::{EntityId, EntityRecord, PropertySet};
use geom_kernel::{PlaneFrame, Profile2d, ProfileEdge};

use crate::types::OpError;

/// Chaining tolerance for connecting curve endpoints, in millimetres.
const CHAIN_TOL: f64 = 1e-4;

/// Resolver from an entity id to its record within the active workspace.
pub type EntityResolver<'a> = &'a dyn Fn(&EntityId) -> Option<EntityRecord>;

/// Extract an extrudable profile from an entity.
///
/// Accepts a circle (its own plane becomes the frame), a sketch (member
/// curves are chained into a closed loop on the sketch plane), or is
/// rejected with a precise reason.
pub fn profile_from_entity(
    record: &EntityRecord,
    resolve: EntityResolver<'_>,
) -> Result<(Profile2d, PlaneFrame), OpError> {
    match &record.properties {
        PropertySet::Circle {
            center,
            radius,
            normal,
        } => {
            let frame = PlaneFrame::from_origin_normal(*center, *normal);
            Ok((Profile2d::circle([0.0, 0.0], *radius), frame))
        }
        PropertySet::Sketch {
            plane_origin,
            plane_normal,
            entities,
        } => {
            let frame = PlaneFrame::from_origin_normal(*plane_origin, *plane_normal);
            let profile = profile_from_members(entities, &frame, resolve)?;
            Ok((profile, frame))
        }
        other => Err(OpError::InvalidSketch {
            reason: format!(
                "entity of kind {} cannot serve as a profile",
                other.kind().as_str()
            ),
        }),
    }
}

/// Project sketch members onto the plane and chain them into one closed
/// loop. Mixed member kinds are supported as long as they chain.
fn profile_from_members(
    members: &[EntityId],
    frame: &PlaneFrame,
    resolve: EntityResolver<'_>,
) -> Result<Profile2d, OpError> {
    let mut segments: Vec<([f64; 2], [f64; 2])> = Vec::new();
    let mut sole_circle: Option<ProfileEdge> = None;

    for id in members {
        let member = resolve(id).ok_or_else(|| OpError::InvalidSketch {
            reason: format!("sketch member {id} does not exist"),
        })?;
        match &member.properties {
            PropertySet::Line2d { start, end } => {
                segments.push((*start, *end));
            }
            PropertySet::Line3d { start, end } => {
                segments.push((frame.to_2d(*start), frame.to_2d(*end)));
            }
            PropertySet::Circle { center, radius, .. } => {
                sole_circle = Some(ProfileEdge::Circle {
                    center: frame.to_2d(*center),
                    radius: *radius,
                });
            }
            PropertySet::Arc {
                center,
                radius,
                start_angle,
                end_angle,
                ..
            } => {
                // Arcs are chained by their chord endpoints; the arc
                // geometry rides along.
                let c = frame.to_2d(*center);
                segments.push((
                    [
                        c[0] + radius * start_angle.cos(),
                        c[1] + radius * start_angle.sin(),
                    ],
                    [
                        c[0] + radius * end_angle.cos(),
                        c[1] + radius * end_angle.sin(),
                    ],
                ));
            }
            other => {
                return Err(OpError::InvalidSketch {
                    reason: format!(
                        "sketch member {} of kind {} is not a profile curve",
                        id,
                        other.kind().as_str()
                    ),
                })
            }
        }
    }

    if let Some(circle) = sole_circle {
        if !segments.is_empty() {
            return Err(OpError::InvalidSketch {
                reason: "a circle profile cannot chain with other curves".to_string(),
            });
        }
        return Ok(Profile2d::new(vec![circle]));
    }
    if segments.is_empty() {
        return Err(OpError::InvalidSketch {
            reason: "sketch has no profile curves".to_string(),
        });
    }

    chain_segments(segments)
}

/// Walk connected segments into one closed loop, flipping segment
/// direction as needed.
fn chain_segments(segments: Vec<([f64; 2], [f64; 2])>) -> Result<Profile2d, OpError> {
    let n = segments.len();
    let mut used = vec![false; n];
    let mut ordered: Vec<([f64; 2], [f64; 2])> = Vec::with_capacity(n);

    used[0] = true;
    ordered.push(segments[0]);

    while ordered.len() < n {
        let tail = ordered[ordered.len() - 1].1;
        let mut advanced = false;
        for (i, seg) in segments.iter().enumerate() {
            if used[i] {
                continue;
            }
            if dist(tail, seg.0) < CHAIN_TOL {
                ordered.push(*seg);
                used[i] = true;
                advanced = true;
                break;
            }
            if dist(tail, seg.1) < CHAIN_TOL {
                ordered.push((seg.1, seg.0));
                used[i] = true;
                advanced = true;
                break;
            }
        }
        if !advanced {
            return Err(OpError::InvalidSketch {
                reason: "profile curves do not form a single connected chain".to_string(),
            });
        }
    }

    let head = ordered[0].0;
    let tail = ordered[ordered.len() - 1].1;
    if dist(head, tail) > CHAIN_TOL {
        return Err(OpError::InvalidSketch {
            reason: "profile chain does not close".to_string(),
        });
    }

    Ok(Profile2d::new(
        ordered
            .into_iter()
            .map(|(start, end)| ProfileEdge::Segment { start, end })
            .collect(),
    ))
}

fn dist(a: [f64; 2], b: [f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_types::{AgentId, WorkspaceId};
    use chrono::Utc;
    use std::collections::HashMap;

    fn record(props: PropertySet) -> EntityRecord {
        let ws = WorkspaceId::root();
        EntityRecord::new(
            EntityId::mint(&ws, props.kind()),
            ws,
            props,
            AgentId::new("t"),
            Utc::now(),
        )
    }

    fn line(s: [f64; 3], e: [f64; 3]) -> EntityRecord {
        record(PropertySet::Line3d { start: s, end: e })
    }

    #[test]
    fn rectangle_sketch_chains_into_profile() {
        let lines = vec![
            line([0.0, 0.0, 0.0], [10.0, 0.0, 0.0]),
            line([10.0, 0.0, 0.0], [10.0, 5.0, 0.0]),
            // Deliberately reversed: the chain walker must flip it.
            line([0.0, 5.0, 0.0], [10.0, 5.0, 0.0]),
            line([0.0, 5.0, 0.0], [0.0, 0.0, 0.0]),
        ];
        let by_id: HashMap<EntityId, EntityRecord> =
            lines.iter().map(|l| (l.id.clone(), l.clone())).collect();
        let sketch = record(PropertySet::Sketch {
            plane_origin: [0.0, 0.0, 0.0],
            plane_normal: [0.0, 0.0, 1.0],
            entities: lines.iter().map(|l| l.id.clone()).collect(),
        });
        let resolve = |id: &EntityId| by_id.get(id).cloned();
        let (profile, _frame) = profile_from_entity(&sketch, &resolve).unwrap();
        assert_eq!(profile.edges.len(), 4);
        assert!(profile.is_closed());
        assert!((profile.area(64).unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn open_chain_is_invalid_sketch() {
        let lines = vec![
            line([0.0, 0.0, 0.0], [10.0, 0.0, 0.0]),
            line([10.0, 0.0, 0.0], [10.0, 5.0, 0.0]),
        ];
        let by_id: HashMap<EntityId, EntityRecord> =
            lines.iter().map(|l| (l.id.clone(), l.clone())).collect();
        let sketch = record(PropertySet::Sketch {
            plane_origin: [0.0, 0.0, 0.0],
            plane_normal: [0.0, 0.0, 1.0],
            entities: lines.iter().map(|l| l.id.clone()).collect(),
        });
        let resolve = |id: &EntityId| by_id.get(id).cloned();
        let err = profile_from_entity(&sketch, &resolve);
        assert!(matches!(err, Err(OpError::InvalidSketch { .. })));
    }

    #[test]
    fn circle_entity_is_directly_extrudable() {
        let circle = record(PropertySet::Circle {
            center: [5.0, 2.5, 0.0],
            radius: 2.0,
            normal: [0.0, 0.0, 1.0],
        });
        let resolve = |_: &EntityId| None;
        let (profile, frame) = profile_from_entity(&circle, &resolve).unwrap();
        assert_eq!(frame.origin, [5.0, 2.5, 0.0]);
        assert!(matches!(
            profile.edges.as_slice(),
            [ProfileEdge::Circle { .. }]
        ));
    }

    #[test]
    fn solid_is_not_a_profile() {
        let solid = record(PropertySet::Solid { brep: vec![0] });
        let resolve = |_: &EntityId| None;
        let err = profile_from_entity(&solid, &resolve);
        assert!(matches!(err, Err(OpError::InvalidSketch { .. })));
    }
}
