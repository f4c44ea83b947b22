//! What a data port carries once bit-packed: logical fields, the physical
//! fields that encapsulate them, and the per-field state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};
use crate::ir::component::Sense;

/// The conventional name of the pass-through physical field interconnect
/// nodes carry logical fields inside of, chosen to never collide with a
/// user subtype.
pub const XDATA: &str = "xdata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalField {
    pub width: i64,
    pub sense: Sense,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhysicalField {
    pub width: i64,
    pub sense: Sense_,
    /// Concurrent-field sets recorded by carriage propagation; packing
    /// reads these to decide non-overlapping bit offsets.
    pub sets: Vec<BTreeSet<String>>,
}

// `Sense` has no `Default`; wrap so `PhysicalField` can derive one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sense_(pub Sense);
impl Default for Sense_ {
    fn default() -> Self {
        Sense_(Sense::Forward)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldState {
    pub phys_field: Option<String>,
    /// `< 0` means unallocated.
    pub phys_field_lo: i64,
    /// `true` = produced/consumed at this node; `false` = pass-through.
    pub is_local: bool,
    pub is_const: bool,
    pub const_value: Option<i64>,
}

impl FieldState {
    pub fn local() -> Self {
        FieldState {
            phys_field: None,
            phys_field_lo: -1,
            is_local: true,
            is_const: false,
            const_value: None,
        }
    }

    pub fn passthrough() -> Self {
        FieldState {
            phys_field: None,
            phys_field_lo: -1,
            is_local: false,
            is_const: false,
            const_value: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Protocol {
    pub logical: BTreeMap<String, LogicalField>,
    pub physical: BTreeMap<String, PhysicalField>,
    pub state: BTreeMap<String, FieldState>,
}

impl Protocol {
    /// Declare a field produced/consumed directly at this port (elaboration
    /// time). `phys_field` is the physical field it lives in immediately
    /// (for un-packed, directly-declared signals this is 1:1 with the
    /// logical field and starts at bit 0; true interconnect packing only
    /// ever applies to the `xdata` passthrough field).
    pub fn declare_local_field(&mut self, name: &str, width: i64, sense: Sense, phys_field: &str) {
        self.logical
            .insert(name.to_string(), LogicalField { width, sense });
        let pf = self
            .physical
            .entry(phys_field.to_string())
            .or_insert_with(|| PhysicalField {
                width: 0,
                sense: Sense_(sense),
                sets: Vec::new(),
            });
        pf.width = pf.width.max(width);
        let mut state = FieldState::local();
        state.phys_field = Some(phys_field.to_string());
        state.phys_field_lo = 0;
        self.state.insert(name.to_string(), state);
    }

    /// Record that `fields` are simultaneously present on this port without
    /// touching any `FieldState` (unlike [`Self::carry_on`], which also
    /// marks the fields non-local). Used when a leaf port declares several
    /// concurrent signals into the same physical field (e.g. `data` and
    /// `header` both routed into `xdata`) and needs the greedy packer to
    /// treat them as co-occurring before the carriage pass ever runs.
    pub fn note_concurrent_fields(&mut self, phys_field: &str, fields: &BTreeSet<String>) {
        if fields.len() < 2 {
            return;
        }
        let pf = self
            .physical
            .entry(phys_field.to_string())
            .or_insert_with(|| PhysicalField {
                width: 0,
                sense: Sense_(Sense::Forward),
                sets: Vec::new(),
            });
        pf.sets.push(fields.clone());
    }

    /// Ensure the `xdata` pass-through physical field exists (created empty
    /// by every interconnect node at construction time).
    pub fn ensure_xdata(&mut self) {
        self.physical.entry(XDATA.to_string()).or_insert_with(|| PhysicalField {
            width: 0,
            sense: Sense_(Sense::Forward),
            sets: Vec::new(),
        });
    }

    /// Record that `phys_field` must concurrently carry `fields` across one
    /// hop. Any field not yet declared on this port is added as a non-local
    /// logical field of the given width/sense, looked up from `widths`.
    pub fn carry_on(
        &mut self,
        phys_field: &str,
        fields: &BTreeSet<String>,
        widths: &BTreeMap<String, (i64, Sense)>,
    ) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        for name in fields {
            if !self.logical.contains_key(name) {
                let (width, sense) = *widths.get(name).ok_or_else(|| {
                    CompileError::internal("carry_on: field width unknown for carried field")
                })?;
                self.logical.insert(name.clone(), LogicalField { width, sense });
                self.state.insert(name.clone(), FieldState::passthrough());
            }
        }
        let pf = self
            .physical
            .entry(phys_field.to_string())
            .or_insert_with(|| PhysicalField {
                width: 0,
                sense: Sense_(Sense::Forward),
                sets: Vec::new(),
            });
        pf.sets.push(fields.clone());
        Ok(())
    }

    /// Bit-pack one physical field: a greedy, deterministic placement such
    /// that no two fields sharing a carriage set overlap. Fields never seen
    /// in any carriage set and not already assigned a bit offset are placed
    /// alone, in name order, after all carriage-derived fields.
    pub fn pack_physical_field(&mut self, phys_field: &str) -> Result<()> {
        let Some(pf) = self.physical.get(phys_field) else {
            return Ok(());
        };
        let sets = pf.sets.clone();

        let mut fields: BTreeSet<String> = BTreeSet::new();
        for s in &sets {
            fields.extend(s.iter().cloned());
        }
        // Also include any field whose state already claims this physical
        // field but that never appeared in a recorded carriage set (e.g. a
        // directly-declared field on a leaf port whose width comes straight
        // from the interface signal list).
        for (name, state) in &self.state {
            if state.phys_field.as_deref() == Some(phys_field) {
                fields.insert(name.clone());
            }
        }

        let occurrence: BTreeMap<String, usize> = fields
            .iter()
            .map(|f| (f.clone(), sets.iter().filter(|s| s.contains(f)).count()))
            .collect();
        let co_fields: BTreeMap<String, BTreeSet<String>> = fields
            .iter()
            .map(|f| {
                let mut c = BTreeSet::new();
                for s in &sets {
                    if s.contains(f) {
                        c.extend(s.iter().cloned());
                    }
                }
                c.remove(f);
                (f.clone(), c)
            })
            .collect();

        let mut order: Vec<String> = fields.into_iter().collect();
        order.sort_by(|a, b| occurrence[b].cmp(&occurrence[a]).then_with(|| a.cmp(b)));

        let mut placed: BTreeMap<String, (i64, i64)> = BTreeMap::new();
        let mut max_width = 0i64;
        for f in &order {
            let width = self
                .logical
                .get(f)
                .map(|lf| lf.width)
                .unwrap_or(0);
            let mut pos = 0i64;
            loop {
                let overlap = co_fields[f].iter().find_map(|g| {
                    placed.get(g).and_then(|&(lo_g, w_g)| {
                        if pos < lo_g + w_g && lo_g < pos + width {
                            Some((lo_g, w_g))
                        } else {
                            None
                        }
                    })
                });
                match overlap {
                    Some((lo_g, w_g)) => pos = lo_g + w_g,
                    None => break,
                }
            }
            placed.insert(f.clone(), (pos, width));
            max_width = max_width.max(pos + width);
        }

        for (f, (lo, _)) in &placed {
            let state = self
                .state
                .entry(f.clone())
                .or_insert_with(FieldState::passthrough);
            state.phys_field = Some(phys_field.to_string());
            state.phys_field_lo = *lo;
        }
        if let Some(pf_mut) = self.physical.get_mut(phys_field) {
            pf_mut.width = pf_mut.width.max(max_width);
        }
        Ok(())
    }

    /// Copy-carriage: make `self`'s layout for `phys_field`
    /// agree bit-for-bit with `upstream`'s, for pass-through nodes whose
    /// downstream port must see exactly the same physical encoding.
    pub fn copy_carriage_from(&mut self, upstream: &Protocol, phys_field: &str) {
        if let Some(pf) = upstream.physical.get(phys_field) {
            self.physical.insert(phys_field.to_string(), pf.clone());
        }
        for (name, state) in &upstream.state {
            if state.phys_field.as_deref() == Some(phys_field) {
                self.logical
                    .entry(name.clone())
                    .or_insert_with(|| upstream.logical[name]);
                self.state.insert(name.clone(), state.clone());
            }
        }
    }

    /// Adopt the *names and widths* (not yet bit offsets) of `other`'s
    /// physical fields. Used by the topology realizer and converter
    /// inserter when splicing a new interconnect port into an existing
    /// connection, so that clock assignment (which runs before packing)
    /// has real width data to minimize over. A name already present keeps
    /// its widest width seen so far rather than its first: repeated calls
    /// across a fixpoint walk must converge to the true maximum, not
    /// whichever connection happened to adopt the field first.
    pub fn adopt_physical_from(&mut self, other: &Protocol) {
        for (name, pf) in &other.physical {
            match self.physical.get_mut(name) {
                Some(existing) => existing.width = existing.width.max(pf.width),
                None => {
                    self.physical.insert(
                        name.clone(),
                        PhysicalField {
                            width: pf.width,
                            sense: pf.sense,
                            sets: Vec::new(),
                        },
                    );
                }
            }
        }
    }

    /// Logical field names declared locally (produced/consumed) at this
    /// port with the given sense — used by carriage propagation to decide
    /// what a node itself requires or supplies.
    pub fn local_fields(&self, sense: Sense) -> BTreeSet<String> {
        self.state
            .iter()
            .filter(|(_, s)| s.is_local)
            .filter(|(name, _)| {
                self.logical
                    .get(*name)
                    .map(|lf| lf.sense == sense)
                    .unwrap_or(false)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Width/sense lookup table for every logical field on this port, used
    /// when carrying newly-seen fields onto an upstream port.
    pub fn widths(&self) -> BTreeMap<String, (i64, Sense)> {
        self.logical
            .iter()
            .map(|(name, lf)| (name.clone(), (lf.width, lf.sense)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widths_for(names: &[&str], width: i64) -> BTreeMap<String, (i64, Sense)> {
        names.iter().map(|n| (n.to_string(), (width, Sense::Forward))).collect()
    }

    #[test]
    fn packing_never_overlaps_cofields() {
        let mut p = Protocol::default();
        p.ensure_xdata();
        let widths = widths_for(&["a", "b", "c"], 4);
        p.carry_on(XDATA, &["a".into(), "b".into()].into_iter().collect(), &widths)
            .unwrap();
        p.carry_on(XDATA, &["b".into(), "c".into()].into_iter().collect(), &widths)
            .unwrap();
        p.pack_physical_field(XDATA).unwrap();

        let lo_a = p.state["a"].phys_field_lo;
        let lo_b = p.state["b"].phys_field_lo;
        let lo_c = p.state["c"].phys_field_lo;
        assert!(lo_a >= 0 && lo_b >= 0 && lo_c >= 0);
        // a,b share a set: must not overlap.
        assert!(lo_a + 4 <= lo_b || lo_b + 4 <= lo_a);
        // b,c share a set: must not overlap.
        assert!(lo_b + 4 <= lo_c || lo_c + 4 <= lo_b);
    }

    #[test]
    fn disjoint_fields_may_reuse_bits() {
        // a,b never co-occur in any set -> packer is free to overlap them,
        // though the greedy algorithm as specified will still place them
        // sequentially since it only checks *placed* co-fields, and a/b are
        // not in each other's co-field set at all.
        let mut p = Protocol::default();
        p.ensure_xdata();
        let widths = widths_for(&["a", "b"], 4);
        p.carry_on(XDATA, &["a".into()].into_iter().collect(), &widths).unwrap();
        p.carry_on(XDATA, &["b".into()].into_iter().collect(), &widths).unwrap();
        p.pack_physical_field(XDATA).unwrap();
        // Neither shares a carriage set with the other, so both may land at 0.
        assert_eq!(p.state["a"].phys_field_lo, 0);
        assert_eq!(p.state["b"].phys_field_lo, 0);
    }
}
