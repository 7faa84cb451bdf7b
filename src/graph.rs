//! CSR adjacency views consumed by the kernels.
//!
//! The kernels never own graph topology; they borrow a [`GraphCsr`] built by
//! the caller. [`CsrGraph`] is a convenience owner that derives the reverse
//! adjacency (and the edge-id table aligning it with the forward edge
//! numbering) once at construction.

use crate::error::Error;

/// Borrowed CSR adjacency plus its transpose.
///
/// `indptr`/`indices` describe the forward graph: row `u` holds the
/// destinations of `u`'s out-edges, and an edge's id is its position in
/// `indices`. The `rev_*` pair is the transposed graph, walked when reducing
/// per destination and when back-propagating per destination node.
///
/// `rev_edge_ids[slot]` gives the forward edge id of each reverse-CSR slot;
/// an empty slice means reverse slot `i` corresponds to forward edge `i`
/// (the same empty-means-identity convention the mapping arrays use).
#[derive(Debug, Clone, Copy)]
pub struct GraphCsr<'a> {
    pub indptr: &'a [usize],
    pub indices: &'a [usize],
    pub rev_indptr: &'a [usize],
    pub rev_indices: &'a [usize],
    pub rev_edge_ids: &'a [usize],
}

impl<'a> GraphCsr<'a> {
    pub fn num_nodes(&self) -> usize {
        self.indptr.len().saturating_sub(1)
    }

    pub fn num_edges(&self) -> usize {
        self.indices.len()
    }

    pub fn in_degree(&self, v: usize) -> usize {
        self.rev_indptr[v + 1] - self.rev_indptr[v]
    }

    pub fn out_degree(&self, u: usize) -> usize {
        self.indptr[u + 1] - self.indptr[u]
    }

    /// Forward edge id of a reverse-CSR slot.
    #[inline]
    pub fn rev_edge_id(&self, slot: usize) -> usize {
        if self.rev_edge_ids.is_empty() {
            slot
        } else {
            self.rev_edge_ids[slot]
        }
    }

    /// Checks the structural invariants before any compute work starts:
    /// `indptr` lengths, monotonicity, column bounds, and the agreement of
    /// the forward and reverse arrays.
    pub fn validate(&self) -> Result<(), Error> {
        let n = self.num_nodes();
        let e = self.num_edges();
        if self.indptr.is_empty() {
            return Err(Error::InvalidGraph("indptr must have length N+1".to_string()));
        }
        if self.rev_indptr.len() != self.indptr.len() {
            return Err(Error::InvalidGraph(format!(
                "rev_indptr length {} does not match indptr length {}",
                self.rev_indptr.len(),
                self.indptr.len()
            )));
        }
        if self.rev_indices.len() != e {
            return Err(Error::InvalidGraph(format!(
                "rev_indices length {} does not match edge count {}",
                self.rev_indices.len(),
                e
            )));
        }
        check_offsets("indptr", self.indptr, e)?;
        check_offsets("rev_indptr", self.rev_indptr, e)?;
        check_columns("indices", self.indices, n)?;
        check_columns("rev_indices", self.rev_indices, n)?;
        if !self.rev_edge_ids.is_empty() {
            if self.rev_edge_ids.len() != e {
                return Err(Error::InvalidGraph(format!(
                    "rev_edge_ids length {} does not match edge count {}",
                    self.rev_edge_ids.len(),
                    e
                )));
            }
            if let Some(&bad) = self.rev_edge_ids.iter().find(|&&id| id >= e) {
                return Err(Error::IndexOutOfBounds { index: bad, size: e });
            }
        }
        Ok(())
    }
}

fn check_offsets(name: &str, indptr: &[usize], num_edges: usize) -> Result<(), Error> {
    if indptr[0] != 0 {
        return Err(Error::InvalidGraph(format!("{} must start at 0", name)));
    }
    if indptr[indptr.len() - 1] != num_edges {
        return Err(Error::InvalidGraph(format!(
            "{} must end at the edge count {}",
            name, num_edges
        )));
    }
    if indptr.windows(2).any(|w| w[0] > w[1]) {
        return Err(Error::InvalidGraph(format!(
            "{} must be monotonically non-decreasing",
            name
        )));
    }
    Ok(())
}

fn check_columns(name: &str, indices: &[usize], num_nodes: usize) -> Result<(), Error> {
    if let Some(&bad) = indices.iter().find(|&&col| col >= num_nodes) {
        return Err(Error::InvalidGraph(format!(
            "{} entry {} exceeds node count {}",
            name, bad, num_nodes
        )));
    }
    Ok(())
}

/// Owned CSR graph; builds the reverse adjacency once at construction.
#[derive(Debug, Clone)]
pub struct CsrGraph {
    indptr: Vec<usize>,
    indices: Vec<usize>,
    rev_indptr: Vec<usize>,
    rev_indices: Vec<usize>,
    rev_edge_ids: Vec<usize>,
}

impl CsrGraph {
    /// Builds the graph from (src, dst) pairs. Edges are grouped by source
    /// node with their relative order preserved, and edge ids follow the
    /// resulting CSR order.
    pub fn from_edges(num_nodes: usize, edges: &[(usize, usize)]) -> Result<Self, Error> {
        for &(u, v) in edges {
            if u >= num_nodes || v >= num_nodes {
                return Err(Error::InvalidGraph(format!(
                    "edge ({}, {}) exceeds node count {}",
                    u, v, num_nodes
                )));
            }
        }
        let mut indptr = vec![0usize; num_nodes + 1];
        for &(u, _) in edges {
            indptr[u + 1] += 1;
        }
        for i in 0..num_nodes {
            indptr[i + 1] += indptr[i];
        }
        let mut cursor = indptr.clone();
        let mut indices = vec![0usize; edges.len()];
        for &(u, v) in edges {
            indices[cursor[u]] = v;
            cursor[u] += 1;
        }
        Self::from_csr(indptr, indices)
    }

    /// Takes ownership of an existing forward CSR and derives the reverse
    /// CSR by a stable counting sort over destinations, so that every
    /// destination's in-edges appear in increasing forward-edge-id order.
    pub fn from_csr(indptr: Vec<usize>, indices: Vec<usize>) -> Result<Self, Error> {
        if indptr.is_empty() {
            return Err(Error::InvalidGraph("indptr must have length N+1".to_string()));
        }
        check_offsets("indptr", &indptr, indices.len())?;
        check_columns("indices", &indices, indptr.len() - 1)?;
        let num_nodes = indptr.len() - 1;
        let num_edges = indices.len();

        let mut rev_indptr = vec![0usize; num_nodes + 1];
        for &v in &indices {
            rev_indptr[v + 1] += 1;
        }
        for i in 0..num_nodes {
            rev_indptr[i + 1] += rev_indptr[i];
        }
        let mut cursor = rev_indptr.clone();
        let mut rev_indices = vec![0usize; num_edges];
        let mut rev_edge_ids = vec![0usize; num_edges];
        for u in 0..num_nodes {
            for eid in indptr[u]..indptr[u + 1] {
                let v = indices[eid];
                let slot = cursor[v];
                cursor[v] += 1;
                rev_indices[slot] = u;
                rev_edge_ids[slot] = eid;
            }
        }
        Ok(Self {
            indptr,
            indices,
            rev_indptr,
            rev_indices,
            rev_edge_ids,
        })
    }

    pub fn view(&self) -> GraphCsr<'_> {
        GraphCsr {
            indptr: &self.indptr,
            indices: &self.indices,
            rev_indptr: &self.rev_indptr,
            rev_indices: &self.rev_indices,
            rev_edge_ids: &self.rev_edge_ids,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.view().num_nodes()
    }

    pub fn num_edges(&self) -> usize {
        self.view().num_edges()
    }

    pub fn in_degree(&self, v: usize) -> usize {
        self.view().in_degree(v)
    }
}
