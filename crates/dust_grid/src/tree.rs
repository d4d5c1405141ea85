//! Mesh tree - arena of subdivision and leaf nodes built from a record stream.
//!
//! Nodes live in one `Vec`; the root is node 0. The children of a
//! subdivision node are contiguous, x fastest, so child (i, j, k) sits at
//! `first_child + (k·ny + j)·nx + i`. Leaves carry their cell index and,
//! once [`MeshTree::add_neighbors`] has run, the node found just beyond each
//! of their six faces.

use std::ops::Range;

use glam::DVec3;

use crate::bounds::{GridBox, Wall};
use crate::error::{GridError, Result};
use crate::source::RecordSource;

/// Index of a node in the tree arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
  pub const ROOT: NodeId = NodeId(0);

  #[inline]
  pub fn index(self) -> usize {
    self.0
  }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum NodeKind {
  /// Slot reserved for a child whose record has not been read yet.
  Pending,
  Subdivision {
    counts: [usize; 3],
    first_child: NodeId,
  },
  Leaf {
    cell: usize,
    neighbors: [Option<NodeId>; 6],
  },
}

/// A box-shaped region of the mesh, either subdivided or a leaf cell.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeNode {
  extent: GridBox,
  pub(crate) kind: NodeKind,
}

impl TreeNode {
  fn pending(extent: GridBox) -> Self {
    Self {
      extent,
      kind: NodeKind::Pending,
    }
  }

  #[inline]
  pub fn extent(&self) -> &GridBox {
    &self.extent
  }

  #[inline]
  pub fn is_leaf(&self) -> bool {
    matches!(self.kind, NodeKind::Leaf { .. })
  }

  /// Cell index of a leaf node.
  #[inline]
  pub fn cell(&self) -> Option<usize> {
    match self.kind {
      NodeKind::Leaf { cell, .. } => Some(cell),
      _ => None,
    }
  }

  /// Child-grid counts of a subdivision node.
  pub fn counts(&self) -> Option<[usize; 3]> {
    match self.kind {
      NodeKind::Subdivision { counts, .. } => Some(counts),
      _ => None,
    }
  }

  /// Arena range holding the children of a subdivision node.
  pub fn children(&self) -> Option<Range<usize>> {
    match self.kind {
      NodeKind::Subdivision {
        counts,
        first_child,
      } => {
        let n = counts.iter().product::<usize>();
        Some(first_child.0..first_child.0 + n)
      }
      _ => None,
    }
  }

  /// Cached neighbor of a leaf through the given wall.
  #[inline]
  pub fn neighbor(&self, wall: Wall) -> Option<NodeId> {
    match self.kind {
      NodeKind::Leaf { neighbors, .. } => neighbors[wall as usize],
      _ => None,
    }
  }
}

/// Tree of mesh nodes with a flat cell-index to leaf lookup.
#[derive(Clone, Debug)]
pub struct MeshTree {
  nodes: Vec<TreeNode>,
  leaves: Vec<NodeId>,
  depth: usize,
}

impl MeshTree {
  /// Build the tree by consuming records from `source` until the root is
  /// complete.
  ///
  /// `on_leaf(cell, source)` is called for every Leaf record, in stream
  /// order, while the source is positioned on it. The caller is responsible
  /// for checking that no records remain afterwards.
  pub fn build<S, F>(source: &mut S, domain: GridBox, mut on_leaf: F) -> Result<Self>
  where
    S: RecordSource,
    F: FnMut(usize, &S) -> Result<()>,
  {
    let mut tree = Self {
      nodes: vec![TreeNode::pending(domain)],
      leaves: Vec::new(),
      depth: 0,
    };
    tree.build_node(NodeId::ROOT, 0, source, &mut on_leaf)?;
    Ok(tree)
  }

  fn build_node<S, F>(
    &mut self,
    id: NodeId,
    level: usize,
    source: &mut S,
    on_leaf: &mut F,
  ) -> Result<()>
  where
    S: RecordSource,
    F: FnMut(usize, &S) -> Result<()>,
  {
    if !source.advance()? {
      return Err(GridError::malformed("mesh data ends prematurely"));
    }
    self.depth = self.depth.max(level);
    let extent = self.nodes[id.0].extent;

    if !source.is_subdivision() {
      let cell = self.leaves.len();
      self.leaves.push(id);
      self.nodes[id.0].kind = NodeKind::Leaf {
        cell,
        neighbors: [None; 6],
      };
      return on_leaf(cell, source);
    }

    let raw = source.subdivision_counts();
    if raw.iter().any(|&n| n < 1) {
      return Err(GridError::malformed(format!(
        "subdivision counts must be positive, got {raw:?}"
      )));
    }
    let counts = raw.map(|n| n as usize);
    let n = counts
      .iter()
      .try_fold(1usize, |acc, &c| acc.checked_mul(c))
      .ok_or_else(|| GridError::malformed(format!("subdivision counts {raw:?} overflow")))?;
    self.nodes.try_reserve(n).map_err(|err| {
      GridError::malformed(format!("cannot hold {n} children for subdivision {raw:?}: {err}"))
    })?;

    let first_child = NodeId(self.nodes.len());
    for k in 0..counts[2] {
      for j in 0..counts[1] {
        for i in 0..counts[0] {
          self
            .nodes
            .push(TreeNode::pending(extent.sub_box(i, j, k, counts)));
        }
      }
    }
    self.nodes[id.0].kind = NodeKind::Subdivision {
      counts,
      first_child,
    };

    for offset in 0..n {
      self.build_node(NodeId(first_child.0 + offset), level + 1, source, on_leaf)?;
    }
    Ok(())
  }

  #[inline]
  pub fn node(&self, id: NodeId) -> &TreeNode {
    &self.nodes[id.0]
  }

  #[inline]
  pub fn root(&self) -> &TreeNode {
    &self.nodes[0]
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn leaf_count(&self) -> usize {
    self.leaves.len()
  }

  /// Leaf node holding the given cell.
  #[inline]
  pub fn leaf(&self, cell: usize) -> Option<NodeId> {
    self.leaves.get(cell).copied()
  }

  /// Number of subdivision levels above the deepest leaf.
  pub fn depth(&self) -> usize {
    self.depth
  }

  /// Leaf containing `point`, or `None` outside the root box.
  pub fn locate(&self, point: DVec3) -> Option<NodeId> {
    if !self.root().extent.contains(point) {
      return None;
    }
    let mut id = NodeId::ROOT;
    loop {
      match self.nodes[id.0].kind {
        NodeKind::Subdivision { .. } => id = self.child(id, point),
        NodeKind::Leaf { .. } => return Some(id),
        NodeKind::Pending => return None,
      }
    }
  }

  /// Child of subdivision node `id` containing `point`.
  ///
  /// The child indices are estimated from the fractional position of the
  /// point. When rounding puts the point just outside that child, each axis
  /// index is moved by one toward the point.
  pub fn child(&self, id: NodeId, point: DVec3) -> NodeId {
    let node = &self.nodes[id.0];
    let NodeKind::Subdivision {
      counts,
      first_child,
    } = node.kind
    else {
      return id;
    };

    let fraction = node.extent.fraction(point);
    let mut index = [0usize; 3];
    for axis in 0..3 {
      let n = counts[axis];
      // NaN (zero-width box) casts to 0.
      index[axis] = ((fraction[axis] * n as f64).floor() as i64).clamp(0, n as i64 - 1) as usize;
    }

    let child = child_id(first_child, counts, index);
    let extent = &self.nodes[child.0].extent;
    if extent.contains(point) {
      return child;
    }
    for axis in 0..3 {
      if point[axis] < extent.min[axis] && index[axis] > 0 {
        index[axis] -= 1;
      } else if point[axis] > extent.max[axis] && index[axis] + 1 < counts[axis] {
        index[axis] += 1;
      }
    }
    child_id(first_child, counts, index)
  }

  /// Cache, for every leaf and wall, the leaf containing the point just
  /// beyond the face center.
  ///
  /// `epsilon` is the per-axis probe offset and `wrap` canonicalizes probes
  /// that cross a periodic boundary. Probes outside the domain, or that fall
  /// back into the same leaf, cache no neighbor.
  pub fn add_neighbors(&mut self, epsilon: DVec3, wrap: impl Fn(DVec3) -> DVec3) {
    for cell in 0..self.leaves.len() {
      let id = self.leaves[cell];
      let extent = self.nodes[id.0].extent;

      let mut found = [None; 6];
      for wall in Wall::ALL {
        let mut probe = extent.face_center(wall);
        let axis = wall.axis();
        if wall.is_max() {
          probe[axis] += epsilon[axis];
        } else {
          probe[axis] -= epsilon[axis];
        }
        found[wall as usize] = self.locate(wrap(probe)).filter(|&n| n != id);
      }

      if let NodeKind::Leaf { neighbors, .. } = &mut self.nodes[id.0].kind {
        *neighbors = found;
      }
    }
  }
}

#[inline]
fn child_id(first_child: NodeId, counts: [usize; 3], [i, j, k]: [usize; 3]) -> NodeId {
  NodeId(first_child.0 + (k * counts[1] + j) * counts[0] + i)
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;
