//! The command buffer: the single channel through which the content
//! pipeline tells the embedding application's renderer what to allocate,
//! dispose, or show.
//!
//! Append-only, single-producer/single-consumer, carried over a bounded
//! `crossbeam-channel` (the same channel primitive the suspendable load
//! tasks use). `BeginAtomic`/`EndAtomic` bracket a run of commands that must
//! be applied together or not at all — e.g. a `Replace`-refined parent's
//! dispose must never be visible without its children's allocate already
//! applied. The consumer is responsible for buffering an atomic group until
//! its `EndAtomic` arrives before acting on any of it.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::error::{InvariantViolation, TileStreamResult};
use crate::node_id::NodeId;

macro_rules! handle_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub fn value(self) -> u64 {
                self.0
            }
        }
    };
}

handle_id!(InstanceId);
handle_id!(MeshId);
handle_id!(MaterialId);
handle_id!(TextureId);

/// Monotonic generator for the handle ids above. One shared generator per
/// pipeline instance.
#[derive(Default)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_instance_id(&self) -> InstanceId {
        InstanceId(self.next())
    }
    pub fn next_mesh_id(&self) -> MeshId {
        MeshId(self.next())
    }
    pub fn next_material_id(&self) -> MaterialId {
        MaterialId(self.next())
    }
    pub fn next_texture_id(&self) -> TextureId {
        TextureId(self.next())
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    AllocateMesh {
        mesh: MeshId,
        vertex_data: std::sync::Arc<[u8]>,
    },
    DisposeMesh {
        mesh: MeshId,
    },
    AllocateMaterial {
        material: MaterialId,
    },
    AddMaterialProperty {
        material: MaterialId,
        key: String,
        value: String,
    },
    DisposeMaterial {
        material: MaterialId,
    },
    AllocateTexture {
        texture: TextureId,
        bytes: bytes::Bytes,
    },
    DisposeTexture {
        texture: TextureId,
    },
    AllocateInstance {
        instance: InstanceId,
        node: NodeId,
        mesh: MeshId,
        material: MaterialId,
        transform: [[f64; 4]; 4],
    },
    DisposeInstance {
        instance: InstanceId,
    },
    UpdateVisibility {
        instance: InstanceId,
        visible: bool,
    },
    /// An opaque application-defined side effect (e.g. a metrics callback),
    /// queued so it's ordered correctly relative to surrounding allocations.
    QueueAction {
        label: String,
    },
    BeginAtomic,
    EndAtomic,
}

/// Producer-side handle. Cloneable; all clones share one channel.
#[derive(Clone)]
pub struct CommandBuffer {
    tx: Sender<Command>,
    atomic_depth: std::sync::Arc<AtomicU64>,
}

/// Consumer-side handle.
pub struct CommandBufferReceiver {
    rx: Receiver<Command>,
}

/// Create a bounded command channel. `capacity` bounds how many commands may
/// be in flight before the producer blocks (back-pressure on the content
/// pipeline if the consumer falls behind).
pub fn command_buffer(capacity: usize) -> (CommandBuffer, CommandBufferReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        CommandBuffer {
            tx,
            atomic_depth: std::sync::Arc::new(AtomicU64::new(0)),
        },
        CommandBufferReceiver { rx },
    )
}

impl CommandBuffer {
    pub fn push(&self, command: Command) -> TileStreamResult<()> {
        match command {
            Command::BeginAtomic => {
                self.atomic_depth.fetch_add(1, Ordering::SeqCst);
            }
            Command::EndAtomic => {
                let prev = self.atomic_depth.fetch_sub(1, Ordering::SeqCst);
                if prev == 0 {
                    return Err(InvariantViolation::UnbalancedAtomicGroup.into());
                }
            }
            _ => {}
        }
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => InvariantViolation::Other(
                "command buffer is full; consumer is not draining".into(),
            )
            .into(),
            TrySendError::Disconnected(_) => {
                InvariantViolation::Other("command buffer consumer is gone".into()).into()
            }
        })
    }

    /// Push a whole atomic group in one call, bracketing it with
    /// `BeginAtomic`/`EndAtomic` automatically.
    pub fn queue_atomic(&self, commands: impl IntoIterator<Item = Command>) -> TileStreamResult<()> {
        self.push(Command::BeginAtomic)?;
        for command in commands {
            self.push(command)?;
        }
        self.push(Command::EndAtomic)
    }
}

/// Application-side callback surface. A `Presenter` is driven by draining a
/// `CommandBufferReceiver`; this trait is the typed alternative to matching
/// on `Command` directly.
pub trait Presenter {
    fn on_allocate(&mut self, command: &Command);
    fn on_dispose(&mut self, command: &Command);
    fn on_update_visibility(&mut self, instance: InstanceId, visible: bool);
}

impl CommandBufferReceiver {
    #[cfg(test)]
    pub(crate) fn try_recv_for_test(&self) -> Result<Command, crossbeam_channel::TryRecvError> {
        self.rx.try_recv()
    }

    /// Drain every currently-available command, grouping atomic runs, and
    /// dispatch each to `presenter`. Returns once the channel would block.
    pub fn drain_to(&self, presenter: &mut dyn Presenter) {
        let mut pending_atomic: Vec<Command> = Vec::new();
        let mut in_atomic = false;

        while let Ok(command) = self.rx.try_recv() {
            match &command {
                Command::BeginAtomic => {
                    in_atomic = true;
                    pending_atomic.clear();
                }
                Command::EndAtomic => {
                    in_atomic = false;
                    for buffered in pending_atomic.drain(..) {
                        dispatch(presenter, buffered);
                    }
                }
                _ if in_atomic => pending_atomic.push(command),
                _ => dispatch(presenter, command),
            }
        }
    }
}

fn dispatch(presenter: &mut dyn Presenter, command: Command) {
    match &command {
        Command::UpdateVisibility { instance, visible } => {
            presenter.on_update_visibility(*instance, *visible)
        }
        Command::DisposeMesh { .. }
        | Command::DisposeMaterial { .. }
        | Command::DisposeTexture { .. }
        | Command::DisposeInstance { .. } => presenter.on_dispose(&command),
        Command::QueueAction { .. } | Command::BeginAtomic | Command::EndAtomic => {}
        _ => presenter.on_allocate(&command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingPresenter {
        allocated: Vec<String>,
        disposed: Vec<String>,
        visibility: Vec<(u64, bool)>,
    }

    impl Presenter for RecordingPresenter {
        fn on_allocate(&mut self, command: &Command) {
            self.allocated.push(format!("{command:?}"));
        }
        fn on_dispose(&mut self, command: &Command) {
            self.disposed.push(format!("{command:?}"));
        }
        fn on_update_visibility(&mut self, instance: InstanceId, visible: bool) {
            self.visibility.push((instance.value(), visible));
        }
    }

    #[test]
    fn unbalanced_end_atomic_is_rejected() {
        let (buf, _rx) = command_buffer(8);
        assert!(buf.push(Command::EndAtomic).is_err());
    }

    #[test]
    fn atomic_group_dispatches_only_after_end() {
        let (buf, rx) = command_buffer(8);
        let ids = Arc::new(IdGenerator::new());
        let instance = ids.next_instance_id();

        buf.queue_atomic(vec![
            Command::AllocateInstance {
                instance,
                node: NodeId::default(),
                mesh: ids.next_mesh_id(),
                material: ids.next_material_id(),
                transform: crate::bvh::node::NodeData::identity_transform(),
            },
            Command::UpdateVisibility {
                instance,
                visible: true,
            },
        ])
        .unwrap();

        let mut presenter = RecordingPresenter::default();
        rx.drain_to(&mut presenter);
        assert_eq!(presenter.allocated.len(), 1);
        assert_eq!(presenter.visibility, vec![(instance.value(), true)]);
    }

    #[test]
    fn drain_is_idempotent_when_empty() {
        let (_buf, rx) = command_buffer(8);
        let mut presenter = RecordingPresenter::default();
        rx.drain_to(&mut presenter);
        assert!(presenter.allocated.is_empty());
    }

    #[test]
    fn shared_generator_issues_unique_ids() {
        let ids = Mutex::new(IdGenerator::new());
        let g = ids.lock().unwrap();
        let a = g.next_instance_id();
        let b = g.next_instance_id();
        assert_ne!(a.value(), b.value());
    }
}
