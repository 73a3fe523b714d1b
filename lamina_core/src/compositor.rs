// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Software composition of a view with its popup and proxy overlays.
//!
//! The base frame comes from the renderer. A popup widget, if one is open,
//! and every registered [`ViewProxy`](crate::proxy::ViewProxy) bitmap are
//! copied over it. Overlays replace pixels rather than blend; their content
//! is opaque UI drawn on top of the page.
//!
//! Proxies paint in registration order, so a later proxy covers an earlier
//! one where they overlap.

use alloc::borrow::Cow;

use kurbo::Rect;

use crate::bitmap::Bitmap;
use crate::delivery::PaintSink;
use crate::geometry::{PixelRect, PixelSize};
use crate::proxy::ViewProxyRegistry;

/// A popup widget's last frame and where it sits.
#[derive(Clone, Copy, Debug)]
pub struct PopupLayer<'a> {
    /// Popup contents at the popup's own pixel size.
    pub bitmap: &'a Bitmap,
    /// Popup position in the parent view, in DIPs.
    pub rect: Rect,
}

/// A composited frame.
#[derive(Debug)]
pub struct CompositedFrame<'a> {
    /// Borrowed from the base frame on the fast path, owned otherwise.
    pub frame: Cow<'a, Bitmap>,
    /// Union of the base damage and every overlay, clamped to the frame.
    pub damage: PixelRect,
    /// Number of overlays painted.
    pub overlays: u32,
}

impl CompositedFrame<'_> {
    /// Returns `true` if the base frame was passed through untouched.
    #[must_use]
    pub fn is_fast_path(&self) -> bool {
        matches!(self.frame, Cow::Borrowed(_))
    }
}

/// Summary of one [`FrameCompositor::deliver`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompositeStats {
    /// Base frame delivered without a copy.
    pub fast_path: bool,
    /// Overlays painted.
    pub overlays: u32,
    /// Damage reported to the sink.
    pub damage: PixelRect,
}

/// Merges a view's frame with its overlays.
#[derive(Debug)]
pub struct FrameCompositor {
    size: PixelSize,
    scale: f64,
    proxies: ViewProxyRegistry,
}

impl FrameCompositor {
    /// A compositor for a view of `size` pixels at `scale`.
    #[must_use]
    pub fn new(size: PixelSize, scale: f64) -> Self {
        Self {
            size,
            scale,
            proxies: ViewProxyRegistry::new(),
        }
    }

    /// Updates the output geometry.
    pub fn set_geometry(&mut self, size: PixelSize, scale: f64) {
        self.size = size;
        self.scale = scale;
    }

    /// Output size in pixels.
    #[must_use]
    pub fn size(&self) -> PixelSize {
        self.size
    }

    /// Device scale factor.
    #[must_use]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Proxies composited over this view.
    #[must_use]
    pub fn proxies(&self) -> &ViewProxyRegistry {
        &self.proxies
    }

    /// Mutable access to the proxies.
    pub fn proxies_mut(&mut self) -> &mut ViewProxyRegistry {
        &mut self.proxies
    }

    /// Merges `base` with `popup` and the registered proxies.
    ///
    /// Without overlays `base` is returned as is. Otherwise a new frame of
    /// the output size is built: `base` at the origin, the popup at its
    /// enclosing pixel rectangle, then each proxy at its rounded bounds.
    pub fn composite<'a>(
        &self,
        base: &'a Bitmap,
        damage: PixelRect,
        popup: Option<PopupLayer<'_>>,
    ) -> CompositedFrame<'a> {
        let bounds = PixelRect::from_size(self.size);
        if popup.is_none() && self.proxies.is_empty() {
            return CompositedFrame {
                frame: Cow::Borrowed(base),
                damage: damage.intersect(PixelRect::from_size(base.size())),
                overlays: 0,
            };
        }

        let mut frame = Bitmap::new(self.size);
        frame.write_pixels(base, 0, 0);
        let mut damage = damage;
        let mut overlays = 0;

        if let Some(popup) = popup
            && !popup.bitmap.draws_nothing()
            && !popup.rect.is_zero_area()
        {
            let at = PixelRect::enclosing(popup.rect, self.scale);
            frame.write_pixels(popup.bitmap, at.x, at.y);
            damage = damage.union(at);
            overlays += 1;
        }

        self.proxies.for_each_bitmap(|_, at, bitmap| {
            frame.write_pixels(bitmap, at.x, at.y);
            damage = damage.union(at);
            overlays += 1;
        });

        CompositedFrame {
            frame: Cow::Owned(frame),
            damage: damage.intersect(bounds),
            overlays,
        }
    }

    /// Composites and hands the result to `sink`.
    ///
    /// Nothing is delivered when the clamped damage is empty. The compositor
    /// is only borrowed shared, so a sink may inspect it during the call.
    pub fn deliver(
        &self,
        base: &Bitmap,
        damage: PixelRect,
        popup: Option<PopupLayer<'_>>,
        sink: &mut dyn PaintSink,
    ) -> CompositeStats {
        let composited = self.composite(base, damage, popup);
        let stats = CompositeStats {
            fast_path: composited.is_fast_path(),
            overlays: composited.overlays,
            damage: composited.damage,
        };
        if !stats.damage.is_empty() {
            sink.on_paint(stats.damage, &composited.frame);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::bitmap::{BLACK, WHITE};
    use crate::proxy::ViewProxy;

    const SIZE: PixelSize = PixelSize::new(100, 100);

    #[test]
    fn popup_is_painted_at_its_pixel_rect() {
        let compositor = FrameCompositor::new(SIZE, 1.0);
        let base = Bitmap::filled(SIZE, BLACK);
        let popup = Bitmap::filled(PixelSize::new(20, 20), WHITE);
        let out = compositor.composite(
            &base,
            PixelRect::ZERO,
            Some(PopupLayer {
                bitmap: &popup,
                rect: Rect::new(10.0, 10.0, 30.0, 30.0),
            }),
        );
        assert_eq!(out.frame.pixel(15, 15), Some(WHITE), "popup pixel");
        assert_eq!(out.frame.pixel(50, 50), Some(BLACK), "base pixel");
        assert!(
            out.damage.contains_rect(PixelRect::new(10, 10, 20, 20)),
            "damage covers the popup"
        );
        assert_eq!(out.overlays, 1, "one overlay");
    }

    #[test]
    fn no_overlays_borrows_base() {
        let compositor = FrameCompositor::new(SIZE, 1.0);
        let base = Bitmap::filled(SIZE, BLACK);
        let out = compositor.composite(&base, PixelRect::new(90, 90, 50, 50), None);
        assert!(out.is_fast_path(), "no copy");
        assert_eq!(out.damage, PixelRect::new(90, 90, 10, 10), "clamped damage");
    }

    #[test]
    fn popup_position_scales_to_pixels() {
        let compositor = FrameCompositor::new(PixelSize::new(200, 200), 2.0);
        let base = Bitmap::filled(PixelSize::new(200, 200), BLACK);
        let popup = Bitmap::filled(PixelSize::new(20, 20), WHITE);
        let out = compositor.composite(
            &base,
            PixelRect::ZERO,
            Some(PopupLayer {
                bitmap: &popup,
                rect: Rect::new(5.5, 5.0, 15.5, 15.0),
            }),
        );
        assert_eq!(out.frame.pixel(11, 10), Some(WHITE), "origin at 2x");
        assert_eq!(out.frame.pixel(10, 10), Some(BLACK), "left of popup");
        assert_eq!(out.damage, PixelRect::new(11, 10, 20, 20), "popup damage");
    }

    #[test]
    fn proxies_paint_over_popup_in_registration_order() {
        let mut compositor = FrameCompositor::new(SIZE, 1.0);
        let mut first = ViewProxy::new(Rect::new(0.0, 0.0, 10.0, 10.0), 1.0);
        let mut second = ViewProxy::new(Rect::new(5.0, 5.0, 15.0, 15.0), 1.0);
        compositor.proxies_mut().add_view_proxy(&first);
        compositor.proxies_mut().add_view_proxy(&second);
        first.set_bitmap(Bitmap::filled(PixelSize::new(10, 10), 1));
        second.set_bitmap(Bitmap::filled(PixelSize::new(10, 10), 2));

        let base = Bitmap::filled(SIZE, BLACK);
        let popup = Bitmap::filled(PixelSize::new(10, 10), WHITE);
        let out = compositor.composite(
            &base,
            PixelRect::ZERO,
            Some(PopupLayer {
                bitmap: &popup,
                rect: Rect::new(0.0, 0.0, 10.0, 10.0),
            }),
        );
        assert_eq!(out.frame.pixel(2, 2), Some(1), "proxy covers popup");
        assert_eq!(out.frame.pixel(7, 7), Some(2), "later proxy on top");
        assert_eq!(out.damage, PixelRect::new(0, 0, 15, 15), "union of overlays");
        assert_eq!(out.overlays, 3, "popup plus two proxies");
    }

    #[test]
    fn empty_popup_is_skipped() {
        let compositor = FrameCompositor::new(SIZE, 1.0);
        let base = Bitmap::filled(SIZE, BLACK);
        let popup = Bitmap::default();
        let out = compositor.composite(
            &base,
            PixelRect::new(0, 0, 1, 1),
            Some(PopupLayer {
                bitmap: &popup,
                rect: Rect::new(10.0, 10.0, 30.0, 30.0),
            }),
        );
        assert_eq!(out.overlays, 0, "nothing painted");
        assert_eq!(out.damage, PixelRect::new(0, 0, 1, 1), "base damage only");
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(PixelRect, PixelSize)>,
    }

    impl PaintSink for Recorder {
        fn on_paint(&mut self, damage: PixelRect, frame: &Bitmap) {
            self.calls.push((damage, frame.size()));
        }
    }

    #[test]
    fn deliver_calls_sink_once_with_clamped_damage() {
        let compositor = FrameCompositor::new(SIZE, 1.0);
        let base = Bitmap::filled(SIZE, BLACK);
        let mut sink = Recorder::default();
        let stats = compositor.deliver(&base, PixelRect::new(-5, -5, 10, 10), None, &mut sink);
        assert!(stats.fast_path, "no overlays");
        assert_eq!(sink.calls, [(PixelRect::new(0, 0, 5, 5), SIZE)], "one paint");

        compositor.deliver(&base, PixelRect::ZERO, None, &mut sink);
        assert_eq!(sink.calls.len(), 1, "empty damage is not delivered");
    }

    /// Reads the compositor it is being called from.
    struct Inspecting<'a> {
        compositor: &'a FrameCompositor,
        seen: Vec<(PixelSize, usize)>,
    }

    impl PaintSink for Inspecting<'_> {
        fn on_paint(&mut self, _damage: PixelRect, _frame: &Bitmap) {
            let c = self.compositor;
            self.seen.push((c.size(), c.proxies().len()));
        }
    }

    #[test]
    fn sink_can_read_the_compositor_while_delivering() {
        let mut compositor = FrameCompositor::new(SIZE, 1.0);
        let proxy = ViewProxy::new(Rect::new(0.0, 0.0, 10.0, 10.0), 1.0);
        compositor.proxies_mut().add_view_proxy(&proxy);
        let base = Bitmap::filled(SIZE, BLACK);

        let compositor = &compositor;
        let mut sink = Inspecting {
            compositor,
            seen: Vec::new(),
        };
        compositor.deliver(&base, PixelRect::from_size(SIZE), None, &mut sink);
        compositor.deliver(&base, PixelRect::from_size(SIZE), None, &mut sink);
        assert_eq!(sink.seen, [(SIZE, 1), (SIZE, 1)], "state visible from both calls");
    }
}
