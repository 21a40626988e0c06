//! Registry of a connection's subflows.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use super::path::Subflow;
use crate::core::{ConnectionError, ConnectionResult, SubflowId, TcpState};

/// Which set a subflow currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubflowClass {
    /// Handshake not finished.
    Candidate,
    /// Usable for data.
    Established,
    /// Asked to close, waiting for the path to finish.
    Closing,
}

impl SubflowClass {
    const ALL: [SubflowClass; 3] = [
        SubflowClass::Candidate,
        SubflowClass::Established,
        SubflowClass::Closing,
    ];

    /// Class a subflow registered in `state` starts in.
    pub fn for_state(state: TcpState) -> Self {
        match state {
            TcpState::Closed | TcpState::SynSent | TcpState::SynRcvd => SubflowClass::Candidate,
            TcpState::Established => SubflowClass::Established,
            _ => SubflowClass::Closing,
        }
    }

    fn slot(self) -> usize {
        match self {
            SubflowClass::Candidate => 0,
            SubflowClass::Established => 1,
            SubflowClass::Closing => 2,
        }
    }
}

impl fmt::Display for SubflowClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubflowClass::Candidate => "candidate",
            SubflowClass::Established => "established",
            SubflowClass::Closing => "closing",
        })
    }
}

/// What a reported state change meant for the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Classification unchanged.
    Unchanged,
    /// Moved from candidate to established.
    Established {
        /// Whether the subflow is the master.
        is_master: bool,
    },
    /// The master subflow entered SYN_RCVD.
    MasterSynRcvd,
    /// Moved into the closing set.
    Closing,
    /// The path reached CLOSED and can be removed.
    Closed,
}

#[derive(Debug)]
struct Entry {
    class: SubflowClass,
    subflow: Subflow,
}

/// Every subflow of a connection, keyed by id and tagged with its class.
///
/// Per-class id lists are built on first use and dropped on any change.
#[derive(Debug, Default)]
pub struct SubflowRegistry {
    entries: BTreeMap<SubflowId, Entry>,
    next_id: u32,
    master: Option<SubflowId>,
    index: [OnceCell<Vec<SubflowId>>; 3],
}

impl SubflowRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the id for the next subflow.
    pub fn allocate_id(&mut self) -> SubflowId {
        let id = SubflowId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register `subflow` in `class`.
    pub fn insert(&mut self, subflow: Subflow, class: SubflowClass) -> ConnectionResult<()> {
        if subflow.is_master() {
            if self.master.is_some() {
                return Err(ConnectionError::DuplicateMaster);
            }
            self.master = Some(subflow.id());
        }
        self.entries.insert(subflow.id(), Entry { class, subflow });
        self.invalidate();
        Ok(())
    }

    /// Remove and return a subflow.
    pub fn remove(&mut self, id: SubflowId) -> Option<Subflow> {
        let entry = self.entries.remove(&id)?;
        if self.master == Some(id) {
            self.master = None;
        }
        self.invalidate();
        Some(entry.subflow)
    }

    /// Look up a subflow.
    pub fn get(&self, id: SubflowId) -> Option<&Subflow> {
        self.entries.get(&id).map(|e| &e.subflow)
    }

    /// Look up a subflow mutably.
    pub fn get_mut(&mut self, id: SubflowId) -> Option<&mut Subflow> {
        self.entries.get_mut(&id).map(|e| &mut e.subflow)
    }

    /// Class of a subflow.
    pub fn class_of(&self, id: SubflowId) -> Option<SubflowClass> {
        self.entries.get(&id).map(|e| e.class)
    }

    /// Move a subflow to `class`, returning its previous class.
    pub fn move_to(&mut self, id: SubflowId, class: SubflowClass) -> Option<SubflowClass> {
        let entry = self.entries.get_mut(&id)?;
        let previous = std::mem::replace(&mut entry.class, class);
        if previous != class {
            debug!(subflow = %id, from = %previous, to = %class, "subflow reclassified");
            self.invalidate();
        }
        Some(previous)
    }

    /// Ids in `class`, in registration order.
    pub fn ids(&self, class: SubflowClass) -> &[SubflowId] {
        self.index[class.slot()].get_or_init(|| {
            self.entries
                .iter()
                .filter(|(_, e)| e.class == class)
                .map(|(id, _)| *id)
                .collect()
        })
    }

    /// The established subflow at position `index`.
    pub fn active(&self, index: usize) -> Option<&Subflow> {
        let id = *self.ids(SubflowClass::Established).get(index)?;
        self.get(id)
    }

    /// Number of subflows in `class`.
    pub fn count(&self, class: SubflowClass) -> usize {
        self.ids(class).len()
    }

    /// Total number of subflows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no subflow is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The master subflow's id, while it is registered.
    pub fn master(&self) -> Option<SubflowId> {
        self.master
    }

    /// Every subflow, in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Subflow> {
        self.entries.values().map(|e| &e.subflow)
    }

    /// Every subflow mutably, in id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Subflow> {
        self.entries.values_mut().map(|e| &mut e.subflow)
    }

    /// Congestion windows of every subflow, whatever its class.
    pub fn windows(&self) -> impl Iterator<Item = u32> + '_ {
        self.iter().map(|sf| sf.transport().window())
    }

    /// Established subflow with the lowest RTT; ties go to the lowest position.
    pub fn lowest_rtt_active(&self) -> Option<SubflowId> {
        let mut best: Option<(std::time::Duration, SubflowId)> = None;
        for id in self.ids(SubflowClass::Established) {
            let Some(sf) = self.get(*id) else { continue };
            let rtt = sf.transport().rtt();
            if best.is_none_or(|(b, _)| rtt < b) {
                best = Some((rtt, *id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Apply a state change reported by subflow `id`.
    ///
    /// `reported_old` must match the recorded state and the step must be
    /// legal; anything else is a fatal consistency violation. Entering
    /// ESTABLISHED moves the subflow from candidate to established; entering
    /// a teardown state moves it to closing.
    pub fn apply_transition(
        &mut self,
        id: SubflowId,
        reported_old: TcpState,
        new: TcpState,
    ) -> ConnectionResult<Transition> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(ConnectionError::UnknownSubflow(id))?;

        let recorded = entry.subflow.state();
        if recorded != reported_old {
            return Err(ConnectionError::StateMismatch {
                subflow: id,
                recorded,
                reported: reported_old,
            });
        }
        if !recorded.can_transition_to(new) {
            return Err(ConnectionError::IllegalTransition {
                subflow: id,
                from: recorded,
                to: new,
            });
        }

        entry.subflow.set_state(new);
        let is_master = entry.subflow.is_master();
        let class = entry.class;
        debug!(subflow = %id, from = %recorded, to = %new, %class, "subflow state change");

        let outcome = match new {
            TcpState::Established => match class {
                SubflowClass::Candidate => {
                    self.move_to(id, SubflowClass::Established);
                    Transition::Established { is_master }
                }
                // Asked to close while still joining.
                SubflowClass::Closing => Transition::Unchanged,
                SubflowClass::Established => {
                    return Err(ConnectionError::IllegalTransition {
                        subflow: id,
                        from: recorded,
                        to: new,
                    });
                }
            },
            TcpState::SynRcvd if is_master => Transition::MasterSynRcvd,
            TcpState::Closed => Transition::Closed,
            state if state.is_tearing_down() => {
                if class == SubflowClass::Closing {
                    Transition::Unchanged
                } else {
                    self.move_to(id, SubflowClass::Closing);
                    Transition::Closing
                }
            }
            _ => Transition::Unchanged,
        };
        Ok(outcome)
    }

    /// Per-class id lists, for diagnostics.
    pub fn classes(&self) -> impl Iterator<Item = (SubflowClass, &[SubflowId])> {
        SubflowClass::ALL.into_iter().map(|c| (c, self.ids(c)))
    }

    fn invalidate(&mut self) {
        for cell in &mut self.index {
            cell.take();
        }
    }
}
