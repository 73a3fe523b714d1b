// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Externally owned overlay views.
//!
//! A [`ViewProxy`] is owned by the embedding UI toolkit. It carries a bitmap
//! and DIP bounds that the compositor paints over the browser content. While
//! registered with a [`ViewProxyRegistry`] it holds a weak back-reference to
//! the registry and reports paints and its own destruction there. The
//! registry in turn only holds weak references, so either side may go away
//! first.
//!
//! Notifications are queued rather than dispatched, and the owner of the
//! registry drains them on its own turn.

use alloc::collections::VecDeque;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use kurbo::{Point, Rect};

use crate::bitmap::Bitmap;
use crate::geometry::PixelRect;

static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique proxy identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(pub u64);

/// What a registered proxy reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProxyNotification {
    /// A new bitmap was accepted.
    Painted(ProxyId),
    /// The proxy was destroyed or moved to another registry.
    Destroyed(ProxyId),
}

#[derive(Default)]
struct RegistryShared {
    /// Registration order is paint order.
    entries: Vec<(ProxyId, Weak<RefCell<ProxyState>>)>,
    notifications: VecDeque<ProxyNotification>,
}

impl RegistryShared {
    fn remove(&mut self, id: ProxyId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }
}

struct ProxyState {
    id: ProxyId,
    bounds: Rect,
    scale: f64,
    bitmap: Option<Bitmap>,
    observer: Option<Weak<RefCell<RegistryShared>>>,
}

/// An overlay view owned outside the compositor.
pub struct ViewProxy {
    state: Rc<RefCell<ProxyState>>,
}

impl fmt::Debug for ViewProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ViewProxy")
            .field("id", &state.id)
            .field("bounds", &state.bounds)
            .field("scale", &state.scale)
            .field("has_bitmap", &state.bitmap.is_some())
            .field("registered", &state.observer.is_some())
            .finish()
    }
}

impl ViewProxy {
    /// Creates an unregistered proxy at `bounds` (DIPs).
    #[must_use]
    pub fn new(bounds: Rect, scale: f64) -> Self {
        let id = ProxyId(NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            state: Rc::new(RefCell::new(ProxyState {
                id,
                bounds,
                scale,
                bitmap: None,
                observer: None,
            })),
        }
    }

    /// This proxy's id.
    #[must_use]
    pub fn id(&self) -> ProxyId {
        self.state.borrow().id
    }

    /// Bounds in DIPs, relative to the host view.
    #[must_use]
    pub fn bounds(&self) -> Rect {
        self.state.borrow().bounds
    }

    /// Moves or resizes the proxy. Takes effect at the next composite.
    pub fn set_bounds(&mut self, bounds: Rect) {
        self.state.borrow_mut().bounds = bounds;
    }

    /// Device scale factor.
    #[must_use]
    pub fn scale_factor(&self) -> f64 {
        self.state.borrow().scale
    }

    /// Changes the device scale factor.
    pub fn set_scale_factor(&mut self, scale: f64) {
        self.state.borrow_mut().scale = scale;
    }

    /// Bounds in physical pixels. A bitmap must match this size exactly.
    #[must_use]
    pub fn backing_bounds(&self) -> PixelRect {
        let state = self.state.borrow();
        PixelRect::rounded(state.bounds, state.scale)
    }

    /// Offers a new bitmap.
    ///
    /// Accepted only while registered and only if its size equals
    /// [`backing_bounds`](Self::backing_bounds). A mismatched bitmap is
    /// dropped without notification, which keeps half-resized frames off
    /// screen. Returns whether the bitmap was accepted.
    pub fn set_bitmap(&mut self, bitmap: Bitmap) -> bool {
        let expected = self.backing_bounds().size();
        let mut state = self.state.borrow_mut();
        let Some(registry) = state.observer.as_ref().and_then(Weak::upgrade) else {
            return false;
        };
        if bitmap.size() != expected {
            return false;
        }
        state.bitmap = Some(bitmap);
        registry
            .borrow_mut()
            .notifications
            .push_back(ProxyNotification::Painted(state.id));
        true
    }

    /// Calls `f` with the stored bitmap.
    pub fn with_bitmap<R>(&self, f: impl FnOnce(Option<&Bitmap>) -> R) -> R {
        f(self.state.borrow().bitmap.as_ref())
    }

    /// Returns `true` while registered with a live registry.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.state
            .borrow()
            .observer
            .as_ref()
            .is_some_and(|o| o.strong_count() > 0)
    }
}

impl Drop for ViewProxy {
    fn drop(&mut self) {
        let state = self.state.borrow();
        if let Some(registry) = state.observer.as_ref().and_then(Weak::upgrade) {
            let mut registry = registry.borrow_mut();
            registry.remove(state.id);
            registry
                .notifications
                .push_back(ProxyNotification::Destroyed(state.id));
        }
    }
}

/// The set of proxies composited over one view.
pub struct ViewProxyRegistry {
    shared: Rc<RefCell<RegistryShared>>,
}

impl fmt::Debug for ViewProxyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("ViewProxyRegistry")
            .field("proxies", &shared.entries.len())
            .field("pending_notifications", &shared.notifications.len())
            .finish()
    }
}

impl Default for ViewProxyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewProxyRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Rc::default(),
        }
    }

    /// Registers `proxy` on top of the existing ones.
    ///
    /// A proxy registered elsewhere is moved: its old registry sees
    /// [`ProxyNotification::Destroyed`]. Registering twice is a no-op.
    pub fn add_view_proxy(&mut self, proxy: &ViewProxy) {
        let mut state = proxy.state.borrow_mut();
        if let Some(old) = state.observer.take().and_then(|o| o.upgrade()) {
            if Rc::ptr_eq(&old, &self.shared) {
                state.observer = Some(Rc::downgrade(&old));
                return;
            }
            let mut old = old.borrow_mut();
            old.remove(state.id);
            old.notifications
                .push_back(ProxyNotification::Destroyed(state.id));
        }
        state.observer = Some(Rc::downgrade(&self.shared));
        self.shared
            .borrow_mut()
            .entries
            .push((state.id, Rc::downgrade(&proxy.state)));
    }

    /// Unregisters `proxy`. Returns `false` if it was not registered here.
    pub fn remove_view_proxy(&mut self, proxy: &ViewProxy) -> bool {
        let mut state = proxy.state.borrow_mut();
        let ours = state
            .observer
            .as_ref()
            .is_some_and(|o| o.as_ptr() == Rc::as_ptr(&self.shared));
        if !ours {
            return false;
        }
        state.observer = None;
        self.shared.borrow_mut().remove(state.id)
    }

    /// Number of live registered proxies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.borrow().entries.len()
    }

    /// Returns `true` with no proxies registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ProxyId) -> bool {
        self.shared.borrow().entries.iter().any(|(e, _)| *e == id)
    }

    /// Takes every queued notification, oldest first.
    pub fn drain_notifications(&mut self) -> Vec<ProxyNotification> {
        self.shared.borrow_mut().notifications.drain(..).collect()
    }

    /// Calls `f` with each proxy's pixel bounds and bitmap, in registration
    /// order. Proxies without a bitmap are skipped.
    pub fn for_each_bitmap(&self, mut f: impl FnMut(ProxyId, PixelRect, &Bitmap)) {
        let shared = self.shared.borrow();
        for (id, weak) in &shared.entries {
            let Some(state) = weak.upgrade() else {
                continue;
            };
            let state = state.borrow();
            if let Some(bitmap) = &state.bitmap {
                f(*id, PixelRect::rounded(state.bounds, state.scale), bitmap);
            }
        }
    }

    /// Pixel bounds and a copy of the bitmap of proxy `id`.
    #[must_use]
    pub fn snapshot(&self, id: ProxyId) -> Option<(PixelRect, Bitmap)> {
        let shared = self.shared.borrow();
        let (_, weak) = shared.entries.iter().find(|(e, _)| *e == id)?;
        let state = weak.upgrade()?;
        let state = state.borrow();
        let bitmap = state.bitmap.clone()?;
        Some((PixelRect::rounded(state.bounds, state.scale), bitmap))
    }

    /// Finds the topmost proxy under `point` (DIPs) and returns it with the
    /// point translated into the proxy's coordinate space.
    #[must_use]
    pub fn hit_test(&self, point: Point) -> Option<(ProxyId, Point)> {
        let shared = self.shared.borrow();
        shared.entries.iter().rev().find_map(|(id, weak)| {
            let state = weak.upgrade()?;
            let bounds = state.borrow().bounds;
            bounds
                .contains(point)
                .then(|| (*id, point - bounds.origin().to_vec2()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PixelSize;

    fn proxy() -> ViewProxy {
        ViewProxy::new(Rect::new(10.0, 10.0, 30.0, 20.0), 2.0)
    }

    #[test]
    fn backing_bounds_are_scaled() {
        let p = proxy();
        assert_eq!(p.backing_bounds(), PixelRect::new(20, 20, 40, 20), "2x scale");
    }

    #[test]
    fn mismatched_bitmap_is_dropped_silently() {
        let mut reg = ViewProxyRegistry::new();
        let mut p = proxy();
        reg.add_view_proxy(&p);
        assert!(p.set_bitmap(Bitmap::filled(PixelSize::new(40, 20), 1)), "matching size");
        reg.drain_notifications();

        assert!(!p.set_bitmap(Bitmap::filled(PixelSize::new(39, 20), 2)), "wrong size");
        assert_eq!(
            p.with_bitmap(|b| b.and_then(|b| b.pixel(0, 0))),
            Some(1),
            "stored bitmap unchanged"
        );
        assert!(reg.drain_notifications().is_empty(), "no repaint requested");
    }

    #[test]
    fn matching_bitmap_notifies_paint() {
        let mut reg = ViewProxyRegistry::new();
        let mut p = proxy();
        reg.add_view_proxy(&p);
        p.set_bitmap(Bitmap::new(PixelSize::new(40, 20)));
        assert_eq!(
            reg.drain_notifications(),
            [ProxyNotification::Painted(p.id())],
            "repaint requested"
        );
    }

    #[test]
    fn unregistered_proxy_ignores_bitmaps() {
        let mut p = proxy();
        assert!(!p.set_bitmap(Bitmap::new(PixelSize::new(40, 20))), "no observer");
    }

    #[test]
    fn destroying_registered_proxy_detaches_it() {
        let mut reg = ViewProxyRegistry::new();
        let p = proxy();
        let id = p.id();
        reg.add_view_proxy(&p);
        assert!(reg.contains(id), "registered");
        drop(p);
        assert!(!reg.contains(id), "entry removed");
        assert_eq!(
            reg.drain_notifications(),
            [ProxyNotification::Destroyed(id)],
            "destruction reported"
        );
    }

    #[test]
    fn proxy_may_outlive_registry() {
        let p = proxy();
        {
            let mut reg = ViewProxyRegistry::new();
            reg.add_view_proxy(&p);
        }
        assert!(!p.is_registered(), "registry gone");
        drop(p);
    }

    #[test]
    fn moving_between_registries_notifies_old_one() {
        let mut a = ViewProxyRegistry::new();
        let mut b = ViewProxyRegistry::new();
        let p = proxy();
        a.add_view_proxy(&p);
        a.add_view_proxy(&p);
        assert_eq!(a.len(), 1, "double add is a no-op");
        b.add_view_proxy(&p);
        assert!(a.is_empty() && b.len() == 1, "moved");
        assert_eq!(
            a.drain_notifications(),
            [ProxyNotification::Destroyed(p.id())],
            "old registry told"
        );
        assert!(!a.remove_view_proxy(&p), "not a's anymore");
        assert!(b.remove_view_proxy(&p), "removed from b");
        assert!(!p.is_registered(), "observer cleared");
    }

    #[test]
    fn bitmaps_visit_in_registration_order_and_hit_test_topmost() {
        let mut reg = ViewProxyRegistry::new();
        let mut lower = ViewProxy::new(Rect::new(0.0, 0.0, 10.0, 10.0), 1.0);
        let mut upper = ViewProxy::new(Rect::new(5.0, 5.0, 15.0, 15.0), 1.0);
        reg.add_view_proxy(&lower);
        reg.add_view_proxy(&upper);
        lower.set_bitmap(Bitmap::new(PixelSize::new(10, 10)));
        upper.set_bitmap(Bitmap::new(PixelSize::new(10, 10)));

        let mut order = Vec::new();
        reg.for_each_bitmap(|id, _, _| order.push(id));
        assert_eq!(order, [lower.id(), upper.id()], "registration order");

        let (hit, local) = reg.hit_test(Point::new(7.0, 8.0)).expect("overlap hit");
        assert_eq!(hit, upper.id(), "last registered is on top");
        assert_eq!(local, Point::new(2.0, 3.0), "proxy-local point");
        assert_eq!(reg.hit_test(Point::new(50.0, 50.0)), None, "miss");
    }
}
