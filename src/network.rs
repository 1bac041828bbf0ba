//! Branched network: an append-only arena of walkers and the segments they
//! trace, with parent/child links expressed as identifiers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{BarwError, Result};
use crate::spatial::SpatialGrid;
use crate::types::{split_heading, SegmentId, Vector, WalkerId};
use crate::walker::{Walker, WalkerStatus};

/// Point `index` of a segment; for pieces, the piece from `index` to `index + 1`.
type NodeRef = (SegmentId, usize);

/// How long, in steps, a new branch ignores the ancestor traces meeting at
/// the junction its parent grew from.
pub const JUNCTION_GRACE_STEPS: u64 = 2;

/// Path traced by one walker between its birth and its end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub owner: WalkerId,
    pub parent: Option<SegmentId>,
    /// Zero or two entries: segments only fork through a branch event.
    pub children: Vec<SegmentId>,
    /// Recorded path; `points[0]` is the start, the last entry the (live) end.
    pub points: Vec<Vector>,
    pub created_at: u64,
    pub closed_at: Option<u64>,
    pub length: f64,
}

impl Segment {
    pub fn start(&self) -> Vector {
        self.points[0]
    }

    pub fn end(&self) -> Vector {
        self.points[self.points.len() - 1]
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// Consecutive point pairs.
    pub fn pieces(&self) -> impl Iterator<Item = (Vector, Vector)> + '_ {
        self.points.windows(2).map(|w| (w[0], w[1]))
    }
}

/// How a branching walker splits its heading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Split {
    /// Angle between the parent heading and each child heading.
    pub half_angle: f64,
    /// Orientation of the split plane around the parent heading (3-D only).
    pub azimuth: f64,
}

/// Contact that triggers annihilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collision {
    /// Two active tips; stored with the lower id first.
    Walkers(WalkerId, WalkerId),
    /// An active tip touching an existing, non-adjacent trace.
    Trace {
        walker: WalkerId,
        segment: SegmentId,
    },
}

impl Collision {
    pub fn walkers(a: WalkerId, b: WalkerId) -> Self {
        if a <= b {
            Collision::Walkers(a, b)
        } else {
            Collision::Walkers(b, a)
        }
    }

    /// Walkers deactivated by this contact.
    pub fn participants(&self) -> Vec<WalkerId> {
        match *self {
            Collision::Walkers(a, b) => vec![a, b],
            Collision::Trace { walker, .. } => vec![walker],
        }
    }

    pub fn involves(&self, id: WalkerId) -> bool {
        match *self {
            Collision::Walkers(a, b) => a == id || b == id,
            Collision::Trace { walker, .. } => walker == id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Network {
    dimension: usize,
    time: u64,
    walkers: Vec<Walker>,
    segments: Vec<Segment>,
    /// Ascending; ids are issued monotonically so pushes keep the order.
    active: Vec<WalkerId>,
    roots: Vec<SegmentId>,
    total_length: f64,
    branch_events: u64,
    nodes: SpatialGrid<NodeRef>,
    pieces: SpatialGrid<NodeRef>,
}

impl Network {
    /// Create a network with one root walker per seed position.
    pub fn seed(
        dimension: usize,
        positions: &[Vector],
        headings: &[Vector],
        cell_size: f64,
    ) -> Result<Network> {
        if !(1..=3).contains(&dimension) {
            return Err(BarwError::config(format!(
                "dimension must be 1, 2 or 3, got {dimension}"
            )));
        }
        if positions.is_empty() {
            return Err(BarwError::config("at least one seed is required"));
        }
        if positions.len() != headings.len() {
            return Err(BarwError::config(format!(
                "{} seed positions but {} headings",
                positions.len(),
                headings.len()
            )));
        }
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(BarwError::config("index cell size must be positive"));
        }

        let mut network = Network::empty(dimension, cell_size);
        for (&position, &heading) in positions.iter().zip(headings) {
            check_position(position, dimension)?;
            let heading = unit_heading(heading, dimension)?;
            let id = network.spawn(position, heading, None, None, 0);
            network.roots.push(network.walkers[id.0].segment);
        }
        Ok(network)
    }

    fn empty(dimension: usize, cell_size: f64) -> Self {
        Self {
            dimension,
            time: 0,
            walkers: Vec::new(),
            segments: Vec::new(),
            active: Vec::new(),
            roots: Vec::new(),
            total_length: 0.0,
            branch_events: 0,
            nodes: SpatialGrid::new(cell_size, dimension),
            pieces: SpatialGrid::new(cell_size, dimension),
        }
    }

    /// New active walker with a fresh one-point segment.
    fn spawn(
        &mut self,
        position: Vector,
        heading: Vector,
        parent_walker: Option<WalkerId>,
        parent_segment: Option<SegmentId>,
        generation: u32,
    ) -> WalkerId {
        let id = WalkerId(self.walkers.len());
        let seg_id = SegmentId(self.segments.len());
        self.segments.push(Segment {
            id: seg_id,
            owner: id,
            parent: parent_segment,
            children: Vec::new(),
            points: vec![position],
            created_at: self.time,
            closed_at: None,
            length: 0.0,
        });
        // A child's start duplicates its parent's end node
        if parent_segment.is_none() {
            self.nodes.insert_point(position, (seg_id, 0));
        }
        if let Some(parent) = parent_segment {
            self.segments[parent.0].children.push(seg_id);
        }
        self.walkers.push(Walker {
            id,
            position,
            heading,
            segment: seg_id,
            parent: parent_walker,
            status: WalkerStatus::Active,
            generation,
            born_at: self.time,
            ended_at: None,
        });
        self.active.push(id);
        id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Current simulation time in steps.
    pub fn time(&self) -> u64 {
        self.time
    }

    pub(crate) fn tick(&mut self) {
        self.time += 1;
    }

    pub fn walkers(&self) -> &[Walker] {
        &self.walkers
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn walker(&self, id: WalkerId) -> Option<&Walker> {
        self.walkers.get(id.0)
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id.0)
    }

    /// Active walker ids in ascending order.
    pub fn active_ids(&self) -> &[WalkerId] {
        &self.active
    }

    pub fn active_walkers(&self) -> impl Iterator<Item = &Walker> + '_ {
        self.active.iter().map(move |id| &self.walkers[id.0])
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn roots(&self) -> &[SegmentId] {
        &self.roots
    }

    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    pub fn branch_events(&self) -> u64 {
        self.branch_events
    }

    pub fn index_cell_size(&self) -> f64 {
        self.nodes.cell_size()
    }

    fn active_walker(&self, id: WalkerId) -> Result<&Walker> {
        let walker = self
            .walkers
            .get(id.0)
            .ok_or(BarwError::UnknownWalker(id))?;
        if !walker.is_active() {
            return Err(BarwError::InvalidTransition {
                walker: id,
                status: walker.status,
            });
        }
        Ok(walker)
    }

    /// Move an active walker, extending its segment to `new_position`.
    pub fn advance_walker(
        &mut self,
        id: WalkerId,
        new_position: Vector,
        new_heading: Vector,
    ) -> Result<()> {
        let seg_id = self.active_walker(id)?.segment;
        check_position(new_position, self.dimension)?;
        let heading = unit_heading(new_heading, self.dimension)?;

        let segment = &mut self.segments[seg_id.0];
        let last = segment.end();
        let index = segment.points.len();
        let step = last.distance(new_position);
        segment.points.push(new_position);
        segment.length += step;
        self.total_length += step;
        self.nodes.insert_point(new_position, (seg_id, index));
        self.pieces.insert_piece(last, new_position, (seg_id, index - 1));

        let walker = &mut self.walkers[id.0];
        walker.position = new_position;
        walker.heading = heading;
        Ok(())
    }

    /// Split an active walker into two children at its current position.
    ///
    /// The parent becomes a branch point (`Branched`); each child owns a new
    /// segment whose parent is the walker's segment.
    pub fn branch(&mut self, id: WalkerId, split: Split) -> Result<(WalkerId, WalkerId)> {
        let parent = self.active_walker(id)?.clone();
        if !(split.half_angle.is_finite() && split.azimuth.is_finite()) {
            return Err(BarwError::config("branch split angles must be finite"));
        }
        self.deactivate(id, WalkerStatus::Branched);

        let [ha, hb] = split_heading(
            parent.heading,
            split.half_angle,
            split.azimuth,
            self.dimension,
        );
        let generation = parent.generation + 1;
        let a = self.spawn(
            parent.position,
            ha.truncated(self.dimension),
            Some(id),
            Some(parent.segment),
            generation,
        );
        let b = self.spawn(
            parent.position,
            hb.truncated(self.dimension),
            Some(id),
            Some(parent.segment),
            generation,
        );
        self.branch_events += 1;
        tracing::trace!(walker = %id, child_a = %a, child_b = %b, time = self.time, "branch");
        Ok((a, b))
    }

    /// End an active walker by a death event.
    pub fn terminate(&mut self, id: WalkerId) -> Result<()> {
        self.active_walker(id)?;
        self.deactivate(id, WalkerStatus::Terminated);
        tracing::trace!(walker = %id, time = self.time, "terminate");
        Ok(())
    }

    /// Deactivate every walker taking part in `collision`.
    pub fn annihilate(&mut self, collision: &Collision) -> Result<()> {
        let participants = collision.participants();
        for &id in &participants {
            self.active_walker(id)?;
        }
        for id in participants {
            self.deactivate(id, WalkerStatus::Annihilated);
        }
        tracing::trace!(?collision, time = self.time, "annihilate");
        Ok(())
    }

    /// Apply a batch of contacts detected in the same step. A walker in
    /// several contacts is deactivated once; all of them at the same time.
    pub fn annihilate_all(&mut self, collisions: &[Collision]) -> Result<Vec<WalkerId>> {
        let victims: BTreeSet<WalkerId> = collisions
            .iter()
            .flat_map(Collision::participants)
            .collect();
        for &id in &victims {
            self.active_walker(id)?;
        }
        for &id in &victims {
            self.deactivate(id, WalkerStatus::Annihilated);
        }
        Ok(victims.into_iter().collect())
    }

    fn deactivate(&mut self, id: WalkerId, status: WalkerStatus) {
        let walker = &mut self.walkers[id.0];
        walker.status = status;
        walker.ended_at = Some(self.time);
        self.segments[walker.segment.0].closed_at = Some(self.time);
        self.active.retain(|&a| a != id);
    }

    /// Sibling segments share a parent; roots have none.
    fn are_siblings(&self, a: SegmentId, b: SegmentId) -> bool {
        let pa = self.segments[a.0].parent;
        pa.is_some() && pa == self.segments[b.0].parent
    }

    /// Segments a walker can never collide with: its own, its parent and its
    /// siblings (they all meet at the walker's branch point).
    fn is_adjacent(&self, walker: &Walker, segment: SegmentId) -> bool {
        let own = walker.segment;
        segment == own
            || Some(segment) == self.segments[own.0].parent
            || self.are_siblings(own, segment)
    }

    /// Ancestor segments, with their children, that meet the walker's
    /// lineage at a branch point made within the last `JUNCTION_GRACE_STEPS`
    /// steps. A fresh child starts next to these traces.
    fn recent_lineage(&self, walker: &Walker) -> Vec<SegmentId> {
        let mut lineage = Vec::new();
        let mut below = self.segments[walker.segment.0].parent;
        while let Some(seg_id) = below {
            let seg = &self.segments[seg_id.0];
            if self.time.saturating_sub(seg.created_at) >= JUNCTION_GRACE_STEPS {
                break;
            }
            let Some(up) = seg.parent else {
                break;
            };
            lineage.push(up);
            lineage.extend(self.segments[up.0].children.iter().copied());
            below = Some(up);
        }
        lineage
    }

    /// All tip-tip and tip-trace contacts closer than `threshold`.
    ///
    /// The relation is symmetric (pairs are stored once, lower id first) and
    /// the result is sorted.
    pub fn detect_collisions(&self, threshold: f64) -> Vec<Collision> {
        let mut found = BTreeSet::new();
        if !(threshold > 0.0) || self.active.is_empty() {
            return Vec::new();
        }

        let mut tips: SpatialGrid<WalkerId> =
            SpatialGrid::new(threshold.max(self.nodes.cell_size()), self.dimension);
        for w in self.active_walkers() {
            tips.insert_point(w.position, w.id);
        }

        for w in self.active_walkers() {
            for other_id in tips.query(w.position, threshold) {
                if other_id <= w.id {
                    continue;
                }
                let other = &self.walkers[other_id.0];
                if self.are_siblings(w.segment, other.segment) {
                    continue;
                }
                if w.position.distance(other.position) < threshold {
                    found.insert(Collision::walkers(w.id, other_id));
                }
            }

            let lineage = self.recent_lineage(w);
            for (seg_id, index) in self.pieces.query(w.position, threshold) {
                if self.is_adjacent(w, seg_id) || lineage.contains(&seg_id) {
                    continue;
                }
                let segment = &self.segments[seg_id.0];
                let owner_active = self.walkers[segment.owner.0].is_active();
                // The live tip piece belongs to the tip-tip check
                if owner_active && index + 2 == segment.points.len() {
                    continue;
                }
                let (a, b) = (segment.points[index], segment.points[index + 1]);
                if w.position.distance_to_piece(a, b) < threshold {
                    found.insert(Collision::Trace {
                        walker: w.id,
                        segment: seg_id,
                    });
                }
            }
        }
        found.into_iter().collect()
    }

    /// Nodes within `radius` of the walker, excluding its own trailing path
    /// (its segment and its parent segment). Returned in a fixed order.
    pub fn nearby_nodes(&self, walker: &Walker, radius: f64) -> Vec<Vector> {
        let own = walker.segment;
        let parent = self.segments[own.0].parent;
        self.nodes
            .query(walker.position, radius)
            .into_iter()
            .filter(|&(seg, _)| seg != own && Some(seg) != parent)
            .map(|(seg, index)| self.segments[seg.0].points[index])
            .filter(|p| p.distance(walker.position) <= radius)
            .collect()
    }

    /// Local network density seen by a walker: count of nearby nodes.
    pub fn local_density(&self, walker: &Walker, radius: f64) -> usize {
        self.nearby_nodes(walker, radius).len()
    }

    /// Rebuild a network from exported records, validating the tree.
    pub fn restore(
        dimension: usize,
        time: u64,
        walkers: Vec<Walker>,
        segments: Vec<Segment>,
        cell_size: f64,
    ) -> Result<Network> {
        if !(1..=3).contains(&dimension) {
            return Err(BarwError::snapshot(format!("bad dimension {dimension}")));
        }
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(BarwError::snapshot("index cell size must be positive"));
        }
        let mut network = Network::empty(dimension, cell_size);
        network.time = time;
        network.walkers = walkers;
        network.segments = segments;
        network.check_invariants()?;

        for seg in &network.segments {
            if seg.parent.is_none() {
                network.roots.push(seg.id);
                network.nodes.insert_point(seg.start(), (seg.id, 0));
            }
            for (i, w) in seg.points.windows(2).enumerate() {
                network.nodes.insert_point(w[1], (seg.id, i + 1));
                network.pieces.insert_piece(w[0], w[1], (seg.id, i));
            }
            network.total_length += seg.length;
            if !seg.children.is_empty() {
                network.branch_events += 1;
            }
        }
        network.active = network
            .walkers
            .iter()
            .filter(|w| w.is_active())
            .map(|w| w.id)
            .collect();
        Ok(network)
    }

    /// Structural checks: identifiers, forest shape, branch-point
    /// continuity and walker/segment ownership.
    pub fn check_invariants(&self) -> Result<()> {
        if self.walkers.len() != self.segments.len() {
            return Err(BarwError::snapshot("every walker must own exactly one segment"));
        }
        for (i, seg) in self.segments.iter().enumerate() {
            if seg.id != SegmentId(i) {
                return Err(BarwError::snapshot(format!("segment at {i} has id {}", seg.id)));
            }
            if seg.points.is_empty() {
                return Err(BarwError::snapshot(format!("segment {} has no points", seg.id)));
            }
            if seg.points.iter().any(|p| !p.fits_dimension(self.dimension)) {
                return Err(BarwError::snapshot(format!(
                    "segment {} leaves the {}-D space",
                    seg.id, self.dimension
                )));
            }
            let owner = self
                .walkers
                .get(seg.owner.0)
                .ok_or_else(|| BarwError::snapshot(format!("segment {} has no owner", seg.id)))?;
            if owner.segment != seg.id {
                return Err(BarwError::snapshot(format!(
                    "segment {} and walker {} disagree on ownership",
                    seg.id, owner.id
                )));
            }
            if let Some(parent) = seg.parent {
                // Parents are created first, so ids strictly increase down the tree
                if parent >= seg.id {
                    return Err(BarwError::snapshot(format!(
                        "segment {} has parent {} created after it",
                        seg.id, parent
                    )));
                }
                let p = &self.segments[parent.0];
                if !p.children.contains(&seg.id) {
                    return Err(BarwError::snapshot(format!(
                        "segment {} missing from children of {}",
                        seg.id, parent
                    )));
                }
                if p.end() != seg.start() {
                    return Err(BarwError::snapshot(format!(
                        "segment {} does not start at the end of {}",
                        seg.id, parent
                    )));
                }
            }
            if !(seg.children.is_empty() || seg.children.len() == 2) {
                return Err(BarwError::snapshot(format!(
                    "segment {} has {} children",
                    seg.id,
                    seg.children.len()
                )));
            }
            for child in &seg.children {
                let c = self
                    .segments
                    .get(child.0)
                    .ok_or_else(|| BarwError::snapshot(format!("unknown child {child}")))?;
                if c.parent != Some(seg.id) {
                    return Err(BarwError::snapshot(format!(
                        "child {} does not point back to {}",
                        child, seg.id
                    )));
                }
            }
        }
        for (i, w) in self.walkers.iter().enumerate() {
            if w.id != WalkerId(i) {
                return Err(BarwError::snapshot(format!("walker at {i} has id {}", w.id)));
            }
            let seg = self
                .segments
                .get(w.segment.0)
                .ok_or_else(|| BarwError::snapshot(format!("walker {} has no segment", w.id)))?;
            if seg.owner != w.id {
                return Err(BarwError::snapshot(format!(
                    "walker {} points at segment {} owned by {}",
                    w.id, seg.id, seg.owner
                )));
            }
            if w.is_active() != seg.is_open() {
                return Err(BarwError::snapshot(format!(
                    "walker {} is {} but its segment open = {}",
                    w.id,
                    w.status,
                    seg.is_open()
                )));
            }
            if w.position != seg.end() {
                return Err(BarwError::snapshot(format!(
                    "walker {} is not at the end of its segment",
                    w.id
                )));
            }
            let branched = w.status == WalkerStatus::Branched;
            if branched == seg.children.is_empty() {
                return Err(BarwError::snapshot(format!(
                    "walker {} status {} inconsistent with its children",
                    w.id, w.status
                )));
            }
        }
        Ok(())
    }
}

fn check_position(position: Vector, dimension: usize) -> Result<()> {
    if !position.is_finite() {
        return Err(BarwError::OutOfDomain { position });
    }
    if !position.fits_dimension(dimension) {
        return Err(BarwError::config(format!(
            "position {position} has components beyond dimension {dimension}"
        )));
    }
    Ok(())
}

fn unit_heading(heading: Vector, dimension: usize) -> Result<Vector> {
    heading
        .truncated(dimension)
        .normalized()
        .ok_or_else(|| BarwError::config(format!("heading {heading} has no direction")))
}
