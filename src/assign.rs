//! Person-to-kickboard assignment and group formation.
//!
//! Every person is attached to the single kickboard whose center is nearest to
//! their own. This is a per-person greedy choice, not a global matching: one
//! kickboard may collect several people while a neighbour collects none.

use serde::Serialize;

use crate::geometry::{distance, BoundingBox};

/// Nearest-kickboard choice for one person.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Assignment {
    pub person: usize,
    /// `None` when the photograph has no kickboards.
    pub kickboard: Option<usize>,
    pub distance: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GroupMember {
    pub person: usize,
    pub bbox: BoundingBox,
    pub distance: f32,
}

/// One kickboard and its closest assigned people, closest first.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Group {
    pub kickboard: usize,
    pub kickboard_box: BoundingBox,
    pub members: Vec<GroupMember>,
}

impl Group {
    /// Kickboard box followed by member boxes, the input to crop geometry.
    pub fn boxes(&self) -> Vec<BoundingBox> {
        std::iter::once(self.kickboard_box)
            .chain(self.members.iter().map(|m| m.bbox))
            .collect()
    }
}

/// Assigns each person to the kickboard with the nearest center.
///
/// Exact ties keep the first kickboard encountered.
pub fn assign_people(kickboards: &[BoundingBox], people: &[BoundingBox]) -> Vec<Assignment> {
    let kb_centers: Vec<_> = kickboards.iter().map(BoundingBox::center).collect();
    people
        .iter()
        .enumerate()
        .map(|(person, p)| {
            let pc = p.center();
            let mut best: Option<(usize, f32)> = None;
            for (idx, kc) in kb_centers.iter().enumerate() {
                let d = distance(pc, *kc);
                if best.map_or(true, |(_, min)| d < min) {
                    best = Some((idx, d));
                }
            }
            Assignment {
                person,
                kickboard: best.map(|(idx, _)| idx),
                distance: best.map_or(f32::INFINITY, |(_, d)| d),
            }
        })
        .collect()
}

/// Builds one group per kickboard that received at least one person.
///
/// Members are sorted by ascending distance (stable, so equal distances keep
/// detector order) and truncated to `top_k`. Groups follow kickboard order.
pub fn form_groups(
    kickboards: &[BoundingBox],
    people: &[BoundingBox],
    assignments: &[Assignment],
    top_k: usize,
) -> Vec<Group> {
    let mut per_kickboard: Vec<Vec<GroupMember>> = vec![Vec::new(); kickboards.len()];
    for a in assignments {
        let (Some(kb), Some(bbox)) = (a.kickboard, people.get(a.person)) else {
            continue;
        };
        if let Some(slot) = per_kickboard.get_mut(kb) {
            slot.push(GroupMember {
                person: a.person,
                bbox: *bbox,
                distance: a.distance,
            });
        }
    }

    per_kickboard
        .into_iter()
        .enumerate()
        .filter_map(|(kickboard, mut members)| {
            members.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            members.truncate(top_k);
            if members.is_empty() {
                return None;
            }
            Some(Group {
                kickboard,
                kickboard_box: kickboards[kickboard],
                members,
            })
        })
        .collect()
}
