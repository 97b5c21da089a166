// SPDX-License-Identifier: CEPL-1.0
//! Single-owner wrapper for native handles.
//!
//! A [`Scoped`] keeps the raw handle next to the parent object that created it
//! (a device, an instance loader) and the function that gives it back. The
//! handle is released exactly once: when the wrapper drops, or earlier through
//! [`Scoped::reset`]. It can be moved but never copied or cloned, so there is
//! never a second owner that could release it again.
//!
//! Teardown order between wrappers is the caller's job: contexts release their
//! children explicitly before their own parent goes away.

use std::fmt;
use std::rc::Rc;

pub struct Scoped<H: Copy, P> {
    raw: H,
    parent: P,
    release: fn(&P, H),
    armed: bool,
}

impl<H: Copy, P> Scoped<H, P> {
    /// # Safety
    /// `raw` must have been created from `parent`, must not be released by
    /// anyone else, and `parent` must still be alive when this wrapper is
    /// dropped or reset.
    pub unsafe fn new(raw: H, parent: P, release: fn(&P, H)) -> Self {
        Self {
            raw,
            parent,
            release,
            armed: true,
        }
    }

    #[inline]
    pub fn raw(&self) -> H {
        self.raw
    }

    pub fn parent(&self) -> &P {
        &self.parent
    }

    /// Releases the handle now.
    pub fn reset(self) {
        drop(self);
    }

    /// Gives up ownership without releasing; the caller becomes responsible.
    pub fn into_raw(mut self) -> H {
        self.armed = false;
        self.raw
    }
}

impl<H: Copy, P> Drop for Scoped<H, P> {
    fn drop(&mut self) {
        if std::mem::replace(&mut self.armed, false) {
            (self.release)(&self.parent, self.raw);
        }
    }
}

impl<H: Copy + fmt::Debug, P> fmt::Debug for Scoped<H, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scoped").field(&self.raw).finish()
    }
}

/// The logical device as held by its children. `ash::Device` carries its
/// whole function table, so children share one copy instead of cloning it.
pub type SharedDevice = Rc<ash::Device>;

/// Shorthand for the device-owned wrappers, which are the majority.
pub type DeviceScoped<H> = Scoped<H, SharedDevice>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    type Log = Rc<RefCell<Vec<u32>>>;

    fn record(log: &Log, raw: u32) {
        log.borrow_mut().push(raw);
    }

    fn scoped(log: &Log, raw: u32) -> Scoped<u32, Log> {
        unsafe { Scoped::new(raw, log.clone(), record) }
    }

    #[test]
    fn releases_once_on_drop() {
        let log = Log::default();
        {
            let h = scoped(&log, 7);
            assert_eq!(h.raw(), 7);
            assert!(log.borrow().is_empty());
        }
        assert_eq!(*log.borrow(), vec![7]);
    }

    #[test]
    fn reset_releases_immediately_and_only_once() {
        let log = Log::default();
        let h = scoped(&log, 3);
        h.reset();
        assert_eq!(*log.borrow(), vec![3]);
    }

    #[test]
    fn moving_transfers_ownership_without_release() {
        let log = Log::default();
        let a = scoped(&log, 1);
        let moved = vec![a];
        assert!(log.borrow().is_empty());
        drop(moved);
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn into_raw_disarms() {
        let log = Log::default();
        let h = scoped(&log, 9);
        assert_eq!(h.into_raw(), 9);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn explicit_resets_define_order() {
        let log = Log::default();
        let view = scoped(&log, 2);
        let chain = scoped(&log, 1);
        view.reset();
        chain.reset();
        assert_eq!(*log.borrow(), vec![2, 1]);
    }

    #[test]
    fn children_share_a_single_parent() {
        let log = Log::default();
        let views: Vec<_> = (0..3).map(|i| scoped(&log, i)).collect();
        assert_eq!(Rc::strong_count(&log), 4);
        drop(views);
        assert_eq!(Rc::strong_count(&log), 1);
    }

    #[test]
    fn vec_of_handles_releases_in_element_order() {
        let log = Log::default();
        let views: Vec<_> = (10..13).map(|i| scoped(&log, i)).collect();
        drop(views);
        assert_eq!(*log.borrow(), vec![10, 11, 12]);
    }
}
