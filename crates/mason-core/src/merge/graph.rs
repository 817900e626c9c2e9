//! Insertion-ordered DAG over script fragments.
//!
//! Vertices are keyed by the SHA-256 digest of the fragment content, so two
//! fragments with byte-identical content share one vertex. Every edge
//! insertion runs a reachability check, which keeps the graph acyclic at all
//! times.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::fragment::Fragment;

/// Stable identity of a fragment inside a merge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    pub fn of(content: &str) -> Self {
        Self(Sha256::digest(content.as_bytes()).into())
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

/// Returned when an edge would close a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleError;

#[derive(Debug, Default)]
pub struct ScriptGraph<'a> {
    vertices: Vec<&'a Fragment>,
    index: HashMap<ContentKey, usize>,
    children: Vec<Vec<usize>>,
    parents: Vec<Vec<usize>>,
}

impl<'a> ScriptGraph<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Add a vertex for `fragment`.
    ///
    /// Returns `None` when a fragment with the same content is already in
    /// the graph.
    pub fn add_vertex(&mut self, fragment: &'a Fragment) -> Option<usize> {
        let key = ContentKey::of(&fragment.content);
        if self.index.contains_key(&key) {
            return None;
        }
        let id = self.vertices.len();
        self.vertices.push(fragment);
        self.index.insert(key, id);
        self.children.push(Vec::new());
        self.parents.push(Vec::new());
        Some(id)
    }

    pub fn fragment(&self, id: usize) -> &'a Fragment {
        self.vertices[id]
    }

    /// Add the edge `from -> to`.
    ///
    /// Returns `Ok(false)` if the edge already exists.
    pub fn add_edge(&mut self, from: usize, to: usize) -> Result<bool, CycleError> {
        if self.children[from].contains(&to) {
            return Ok(false);
        }
        if from == to || self.reaches(to, from) {
            return Err(CycleError);
        }
        self.children[from].push(to);
        self.parents[to].push(from);
        Ok(true)
    }

    fn reaches(&self, start: usize, target: usize) -> bool {
        let mut seen = vec![false; self.vertices.len()];
        let mut stack = vec![start];
        while let Some(v) = stack.pop() {
            if v == target {
                return true;
            }
            if std::mem::replace(&mut seen[v], true) {
                continue;
            }
            stack.extend(self.children[v].iter().copied());
        }
        false
    }

    /// Vertices in a dependency-respecting depth-first order.
    ///
    /// Roots are walked in insertion order and children in edge-insertion
    /// order. A vertex is only emitted once all of its parents have been, so
    /// a shared child is reached again from its last parent.
    pub fn linearize(&self) -> Vec<usize> {
        let mut emitted = vec![false; self.vertices.len()];
        let mut order = Vec::with_capacity(self.vertices.len());
        for root in (0..self.vertices.len()).filter(|v| self.parents[*v].is_empty()) {
            self.visit(root, &mut emitted, &mut order);
        }
        order
    }

    fn visit(&self, start: usize, emitted: &mut [bool], order: &mut Vec<usize>) {
        let mut stack = vec![start];
        while let Some(v) = stack.pop() {
            if emitted[v] || self.parents[v].iter().any(|p| !emitted[*p]) {
                continue;
            }
            emitted[v] = true;
            order.push(v);
            stack.extend(self.children[v].iter().rev().copied());
        }
    }
}
