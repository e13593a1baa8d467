//! Revertible command recording.
//!
//! Wraps a [`CommandBuffer`] and records the inverse of every `Allocate*`
//! command it forwards. `revert()` replays those inverses in LIFO order —
//! the same undo-stack shape the teacher's cache eviction logic needs when
//! an in-flight decode must be unwound after a generation bump, generalized
//! here to arbitrary allocate/dispose pairs instead of one specific cache
//! slot.

use crate::command::{Command, CommandBuffer};
use crate::error::TileStreamResult;

pub struct RevertibleCommandStack {
    inner: CommandBuffer,
    inverses: Vec<Command>,
}

impl RevertibleCommandStack {
    pub fn new(inner: CommandBuffer) -> Self {
        Self {
            inner,
            inverses: Vec::new(),
        }
    }

    /// Forward `command`, recording its inverse if it's an allocate-shaped
    /// command. Non-allocate commands (visibility updates, queued actions,
    /// atomic brackets) pass through unrecorded.
    pub fn push(&mut self, command: Command) -> TileStreamResult<()> {
        if let Some(inverse) = inverse_of(&command) {
            self.inverses.push(inverse);
        }
        self.inner.push(command)
    }

    pub fn queue_atomic(&mut self, commands: Vec<Command>) -> TileStreamResult<()> {
        for inverse in commands.iter().rev().filter_map(inverse_of) {
            self.inverses.push(inverse);
        }
        self.inner.queue_atomic(commands)
    }

    /// Replay every recorded inverse, most-recent-first, then clear the
    /// stack. Used when a node's load must be undone in full (e.g. a
    /// target-state flip cancelled it after it finished).
    pub fn revert(&mut self) -> TileStreamResult<()> {
        while let Some(inverse) = self.inverses.pop() {
            self.inner.push(inverse)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.inverses.is_empty()
    }
}

fn inverse_of(command: &Command) -> Option<Command> {
    match command {
        Command::AllocateMesh { mesh, .. } => Some(Command::DisposeMesh { mesh: *mesh }),
        Command::AllocateMaterial { material } => {
            Some(Command::DisposeMaterial { material: *material })
        }
        Command::AllocateTexture { texture, .. } => {
            Some(Command::DisposeTexture { texture: *texture })
        }
        Command::AllocateInstance { instance, .. } => {
            Some(Command::DisposeInstance { instance: *instance })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{command_buffer, IdGenerator};

    #[test]
    fn revert_disposes_in_lifo_order() {
        let (buf, rx) = command_buffer(16);
        let mut stack = RevertibleCommandStack::new(buf);
        let ids = IdGenerator::new();
        let mesh = ids.next_mesh_id();
        let material = ids.next_material_id();

        stack
            .push(Command::AllocateMesh {
                mesh,
                vertex_data: std::sync::Arc::from(Vec::new().into_boxed_slice()),
            })
            .unwrap();
        stack
            .push(Command::AllocateMaterial { material })
            .unwrap();

        stack.revert().unwrap();
        assert!(stack.is_empty());

        // Drain the allocate pair plus the two reverts.
        let mut order = Vec::new();
        while let Ok(c) = rx_try_recv(&rx) {
            order.push(c);
        }
        assert!(matches!(order[0], Command::AllocateMesh { .. }));
        assert!(matches!(order[1], Command::AllocateMaterial { .. }));
        assert!(matches!(order[2], Command::DisposeMaterial { .. }));
        assert!(matches!(order[3], Command::DisposeMesh { .. }));
    }

    fn rx_try_recv(
        rx: &crate::command::CommandBufferReceiver,
    ) -> Result<Command, crossbeam_channel::TryRecvError> {
        rx.try_recv_for_test()
    }
}
