//! Pending call frames.
//!
//! One frame per host→script callback in flight. Host references passed as
//! arguments are pinned for the life of the frame so a sweep triggered from
//! inside the callback cannot release them while the host still expects them
//! to be valid.

use std::cell::RefCell;
use std::collections::HashSet;

use crate::callback::CallbackId;
use crate::wire::HostId;

#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) callback: CallbackId,
    pub(crate) arg_count: usize,
    pub(crate) pinned: Vec<HostId>,
    pub(crate) failed: bool,
}

#[derive(Default)]
pub(crate) struct FrameStack {
    frames: RefCell<Vec<Frame>>,
}

impl FrameStack {
    /// Push a frame. It is popped when the returned guard drops, on every exit
    /// path.
    pub(crate) fn enter(&self, frame: Frame) -> FrameGuard<'_> {
        tracing::debug!(
            callback = %frame.callback,
            args = frame.arg_count,
            depth = self.depth() + 1,
            "entering callback frame"
        );
        self.frames.borrow_mut().push(frame);
        FrameGuard { stack: self }
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    pub(crate) fn pinned(&self) -> HashSet<HostId> {
        self.frames
            .borrow()
            .iter()
            .flat_map(|frame| frame.pinned.iter().copied())
            .collect()
    }
}

pub(crate) struct FrameGuard<'a> {
    stack: &'a FrameStack,
}

impl FrameGuard<'_> {
    pub(crate) fn mark_failed(&self) {
        if let Some(frame) = self.stack.frames.borrow_mut().last_mut() {
            frame.failed = true;
        }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.stack.frames.borrow_mut().pop() {
            tracing::debug!(
                callback = %frame.callback,
                failed = frame.failed,
                "leaving callback frame"
            );
        }
    }
}
