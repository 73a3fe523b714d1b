// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The off-screen view tree.
//!
//! An [`OffscreenHost`] owns every view of one embedded browser: the root
//! view, at most one popup widget per view (a `<select>` dropdown, say), and
//! at most one child view (a fullscreen widget). Views live in a slot arena
//! and are addressed by generation-counted [`ViewId`]s. Parent, popup, and
//! child links are ids, never owning references, so a view is torn down in
//! two explicit phases:
//!
//! 1. [`cancel_widget`](OffscreenHost::cancel_widget) detaches the view from
//!    its parent and marks it destroyed. Later calls are no-ops.
//! 2. The next [`run_pending_tasks`](OffscreenHost::run_pending_tasks) frees
//!    the slot. Its id then fails every lookup.
//!
//! Work requested from inside input dispatch (closing a popup because the
//! wheel moved outside it) and resize re-issues are queued the same way and
//! run on the next turn, never nested inside the call that caused them.
//!
//! Every view owns an [`OffscreenOutput`]. A resize that the view's
//! [`ResizeCoalescer`] lets through reshapes that output's buffer queue, so a
//! burst of resizes reallocates buffers at most twice.
//!
//! Frames reach the embedder through the host's handler, which implements
//! both [`PaintSink`] and [`TextureSink`].

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use kurbo::{Point, Rect, Size};

use crate::bitmap::Bitmap;
use crate::buffer::{
    AllocError, BufferFormat, BufferHandle, BufferUsage, ColorSpace, SharedImageInterface,
};
use crate::compositor::{FrameCompositor, PopupLayer};
use crate::config::{HostConfig, SurfaceConfig};
use crate::delivery::{PaintSink, ReleaseCallback, TextureFrame, TextureSink};
use crate::geometry::{PixelRect, PixelSize};
use crate::gpu::GpuContext;
use crate::identity::{
    FrameSinkId, FrameSinkIdAllocator, LocalSurfaceId, SurfaceId, SurfaceIdentitySequencer,
};
use crate::output::OffscreenOutput;
use crate::pacing::{BeginFrameArgs, BeginFrameSource, FrameRate};
use crate::proxy::{ProxyId, ProxyNotification, ViewProxy};
use crate::resize::{
    ResizeCoalescer, ResizeDecision, ResizeRelease, ResizeState, SurfaceGeometry,
};
use crate::surface::{Binding, SurfaceError};
use crate::sync::SyncToken;
use crate::time::{Clock, HostTime, Timebase};
use crate::trace::{
    BeginFrameEvent, CompositeEvent, FrameSummaryBuilder, PhaseBeginEvent, PhaseEndEvent,
    PhaseKind, ResizeAction, ResizeEvent, SharedTraceSink, SurfaceIdEvent,
    TextureDeliveredEvent, Tracer,
};

/// A handle to a view in an [`OffscreenHost`].
///
/// Carries a generation so a handle to a freed view never aliases a newer
/// view in the same slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId {
    idx: u32,
    generation: u32,
}

impl ViewId {
    /// Slot index (for diagnostics only).
    #[must_use]
    pub const fn index(self) -> u32 {
        self.idx
    }

    /// Generation counter.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ViewId({}@gen{})", self.idx, self.generation)
    }
}

/// What role a view plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// The browser's main view.
    Root,
    /// A popup widget drawn over its parent.
    Popup,
    /// A child widget that replaces its parent while shown.
    Child,
}

/// Where a pointer event should go.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputTarget {
    /// A proxy view, with the point in proxy space.
    Proxy {
        /// Hit proxy.
        proxy: ProxyId,
        /// Point relative to the proxy.
        point: Point,
    },
    /// The popup widget, with the point in popup space.
    Popup {
        /// Popup view.
        view: ViewId,
        /// Point relative to the popup.
        point: Point,
    },
    /// The view itself.
    Primary {
        /// Target view.
        view: ViewId,
        /// Point in view space.
        point: Point,
    },
}

#[derive(Clone, Copy, Debug)]
enum DeferredTask {
    CancelWidget(ViewId),
    ReissueResize(ViewId, SurfaceGeometry),
    ReleaseView(ViewId),
}

struct View<C: GpuContext, S: SharedImageInterface> {
    kind: ViewKind,
    parent: Option<ViewId>,
    popup: Option<ViewId>,
    child: Option<ViewId>,
    frame_sink_id: FrameSinkId,
    showing: bool,
    destroyed: bool,
    size: Size,
    screen_scale: f64,
    /// `0.0` means follow the screen.
    manual_scale: f64,
    /// Popup placement in the parent, in DIPs.
    popup_rect: Rect,
    frame_rate: FrameRate,
    backing: Bitmap,
    compositor: FrameCompositor,
    resize: ResizeCoalescer,
    identity: SurfaceIdentitySequencer,
    begin_frame: BeginFrameSource,
    /// A failed surface is kept as its error until the next applied resize
    /// rebuilds it.
    output: Result<OffscreenOutput<C, S>, SurfaceError>,
}

impl<C: GpuContext, S: SharedImageInterface> View<C, S> {
    fn scale(&self) -> f64 {
        if self.manual_scale > 0.0 {
            self.manual_scale
        } else {
            self.screen_scale
        }
    }

    fn geometry(&self) -> SurfaceGeometry {
        SurfaceGeometry::new(self.size, self.scale())
    }
}

/// Slot arena of views with generation-checked handles.
struct ViewStore<C: GpuContext, S: SharedImageInterface> {
    slots: Vec<Option<View<C, S>>>,
    generation: Vec<u32>,
    free_list: Vec<u32>,
}

impl<C: GpuContext, S: SharedImageInterface> Default for ViewStore<C, S> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            generation: Vec::new(),
            free_list: Vec::new(),
        }
    }
}

impl<C: GpuContext, S: SharedImageInterface> ViewStore<C, S> {
    fn insert(&mut self, view: View<C, S>) -> ViewId {
        if let Some(idx) = self.free_list.pop() {
            self.slots[idx as usize] = Some(view);
            return ViewId {
                idx,
                generation: self.generation[idx as usize],
            };
        }
        #[expect(
            clippy::cast_possible_truncation,
            reason = "view count never approaches u32::MAX"
        )]
        let idx = self.slots.len() as u32;
        self.slots.push(Some(view));
        self.generation.push(0);
        ViewId { idx, generation: 0 }
    }

    fn get(&self, id: ViewId) -> Option<&View<C, S>> {
        if self.generation.get(id.idx as usize) != Some(&id.generation) {
            return None;
        }
        self.slots[id.idx as usize].as_ref()
    }

    fn get_mut(&mut self, id: ViewId) -> Option<&mut View<C, S>> {
        if self.generation.get(id.idx as usize) != Some(&id.generation) {
            return None;
        }
        self.slots[id.idx as usize].as_mut()
    }

    fn remove(&mut self, id: ViewId) -> Option<View<C, S>> {
        self.get(id)?;
        let view = self.slots[id.idx as usize].take();
        // Bump generation so old handles immediately fail lookup.
        self.generation[id.idx as usize] += 1;
        self.free_list.push(id.idx);
        view
    }

    fn ids(&self) -> Vec<ViewId> {
        self.slots
            .iter()
            .zip(&self.generation)
            .enumerate()
            .filter(|(_, (slot, _))| slot.is_some())
            .map(|(idx, (_, &generation))| {
                #[expect(
                    clippy::cast_possible_truncation,
                    reason = "slot count fits in u32 by construction"
                )]
                let idx = idx as u32;
                ViewId { idx, generation }
            })
            .collect()
    }
}

/// Collects the frame an output presents so the host can route it.
struct Presented(Option<TextureFrame>);

impl TextureSink for Presented {
    fn on_texture_paint(&mut self, frame: TextureFrame) {
        self.0 = Some(frame);
    }
}

/// Owns the views of one off-screen browser and routes their frames.
pub struct OffscreenHost<C: GpuContext, S: SharedImageInterface, H> {
    config: HostConfig,
    timebase: Timebase,
    context: Rc<C>,
    shared_images: Rc<S>,
    handler: H,
    views: ViewStore<C, S>,
    tasks: VecDeque<DeferredTask>,
    frame_sinks: FrameSinkIdAllocator,
    painting: bool,
    shared_texture: bool,
    background_color: u32,
    transparent: bool,
    frame_index: u64,
    trace_sink: Option<SharedTraceSink>,
    clock: Option<Rc<dyn Clock>>,
}

impl<C: GpuContext, S: SharedImageInterface, H> fmt::Debug for OffscreenHost<C, S, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffscreenHost")
            .field("config", &self.config)
            .field("views", &self.views.ids())
            .field("pending_tasks", &self.tasks.len())
            .field("painting", &self.painting)
            .finish_non_exhaustive()
    }
}

impl<C, S, H> OffscreenHost<C, S, H>
where
    C: GpuContext,
    S: SharedImageInterface + 'static,
    H: PaintSink + TextureSink,
{
    /// Creates a host with no views.
    ///
    /// `context` and `shared_images` back the surface of every view.
    pub fn new(
        config: HostConfig,
        timebase: Timebase,
        context: Rc<C>,
        shared_images: Rc<S>,
        handler: H,
    ) -> Self {
        Self {
            config,
            timebase,
            context,
            shared_images,
            handler,
            views: ViewStore::default(),
            tasks: VecDeque::new(),
            frame_sinks: FrameSinkIdAllocator::new(1),
            painting: true,
            shared_texture: false,
            background_color: config.background_color,
            transparent: config.transparent,
            frame_index: 0,
            trace_sink: None,
            clock: None,
        }
    }

    /// Installs (or removes) the sink receiving host events. The outputs of
    /// every view report into the same sink.
    pub fn set_trace_sink(&mut self, sink: Option<SharedTraceSink>) {
        for v in self.views.slots.iter_mut().flatten() {
            if let Ok(output) = &mut v.output {
                output.set_trace_sink(sink.clone());
            }
        }
        self.trace_sink = sink;
    }

    /// Installs (or removes) the clock timing frame phases, here and in
    /// every view's output.
    pub fn set_clock(&mut self, clock: Option<Rc<dyn Clock>>) {
        for v in self.views.slots.iter_mut().flatten() {
            if let Ok(output) = &mut v.output {
                output.set_clock(clock.clone());
            }
        }
        self.clock = clock;
    }

    fn tracer(&self) -> Tracer<'_> {
        Tracer::from_shared(self.trace_sink.as_ref())
    }

    fn now(&self) -> HostTime {
        self.clock.as_ref().map_or(HostTime(0), |clock| clock.now())
    }

    /// The frame receiver.
    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Mutable access to the frame receiver.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    // -- View lifecycle --

    fn new_view(
        &mut self,
        kind: ViewKind,
        parent: Option<ViewId>,
        size: Size,
        scale: f64,
    ) -> View<C, S> {
        let rate = FrameRate::new(self.config.clamp_frame_rate(self.config.default_frame_rate));
        let geometry = SurfaceGeometry::new(size, scale);
        let output = self.build_output(geometry);
        let mut begin_frame = BeginFrameSource::new(rate, self.timebase);
        begin_frame.set_paused(true);
        View {
            kind,
            parent,
            popup: None,
            child: None,
            frame_sink_id: self.frame_sinks.next_frame_sink_id(),
            showing: false,
            destroyed: false,
            size,
            screen_scale: scale,
            manual_scale: 0.0,
            popup_rect: Rect::ZERO,
            frame_rate: rate,
            backing: Bitmap::default(),
            compositor: FrameCompositor::new(geometry.pixel_size(), scale),
            resize: ResizeCoalescer::new(),
            identity: SurfaceIdentitySequencer::new(),
            begin_frame,
            output,
        }
    }

    fn build_output(
        &self,
        geometry: SurfaceGeometry,
    ) -> Result<OffscreenOutput<C, S>, SurfaceError> {
        let config = SurfaceConfig {
            initial_size: geometry.pixel_size(),
            initial_scale: surface_scale(geometry.scale),
            ..self.config.surface
        };
        let mut output = OffscreenOutput::new(
            Rc::clone(&self.context),
            Rc::clone(&self.shared_images),
            config,
        )?;
        output.set_trace_sink(self.trace_sink.clone());
        output.set_clock(self.clock.clone());
        Ok(output)
    }

    /// Creates the root view at `size` DIPs and commits its first geometry.
    ///
    /// The view starts hidden.
    pub fn create_root(&mut self, size: Size, scale: f64) -> ViewId {
        let view = self.new_view(ViewKind::Root, None, size, scale);
        let id = self.views.insert(view);
        self.synchronize_geometry(id, true);
        id
    }

    /// Opens a popup widget over `parent` at `rect` (parent DIPs) and shows
    /// it.
    ///
    /// An existing popup of `parent` is cancelled first. The popup inherits
    /// the parent's scale and frame rate.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is stale.
    pub fn init_as_popup(&mut self, parent: ViewId, rect: Rect) -> ViewId {
        let (old, scale, rate) = {
            let p = self.live(parent);
            (p.popup, p.scale(), p.frame_rate)
        };
        if let Some(old) = old {
            self.cancel_widget(old);
        }
        let mut view = self.new_view(ViewKind::Popup, Some(parent), rect.size(), scale);
        view.popup_rect = rect;
        view.frame_rate = rate;
        view.begin_frame.set_rate(rate, self.timebase);
        let id = self.views.insert(view);
        self.live_mut(parent).popup = Some(id);
        self.synchronize_geometry(id, true);
        self.show(id);
        id
    }

    /// Creates a child widget that takes over `parent`'s area and shows it,
    /// hiding `parent`.
    ///
    /// An existing child of `parent` is cancelled first.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is stale.
    pub fn init_as_child(&mut self, parent: ViewId) -> ViewId {
        let (old, size, scale) = {
            let p = self.live(parent);
            (p.child, p.size, p.scale())
        };
        if let Some(old) = old {
            self.cancel_widget(old);
        }
        let view = self.new_view(ViewKind::Child, Some(parent), size, scale);
        let id = self.views.insert(view);
        self.live_mut(parent).child = Some(id);
        self.synchronize_geometry(id, true);
        self.show(id);
        id
    }

    /// Makes `view` visible.
    ///
    /// Allocates a surface identity if the view has none. Showing a child
    /// hides its parent.
    pub fn show(&mut self, view: ViewId) {
        let Some(v) = self.views.get_mut(view).filter(|v| !v.destroyed) else {
            return;
        };
        if v.showing {
            return;
        }
        v.showing = true;
        v.begin_frame.set_paused(false);
        let allocate = !v.identity.has_valid();
        let (kind, parent) = (v.kind, v.parent);
        if allocate {
            self.allocate_identity(view);
        }
        if kind == ViewKind::Child
            && let Some(parent) = parent
        {
            self.hide(parent);
        }
    }

    /// Hides `view` and stops its begin-frame signals.
    pub fn hide(&mut self, view: ViewId) {
        if let Some(v) = self.views.get_mut(view) {
            v.showing = false;
            v.begin_frame.set_paused(true);
        }
    }

    /// Tears down a popup or child view.
    ///
    /// The parent's link is cleared first. A cancelled popup sends an empty
    /// popup texture frame so the embedder drops the layer, and its parent
    /// is recomposited without it; a cancelled child re-shows its parent. The
    /// slot itself is freed on the next [`run_pending_tasks`]. Cancelling a
    /// view twice, or a root view, does nothing.
    ///
    /// [`run_pending_tasks`]: Self::run_pending_tasks
    pub fn cancel_widget(&mut self, view: ViewId) {
        let Some(v) = self.views.get_mut(view) else {
            return;
        };
        if v.destroyed || v.kind == ViewKind::Root {
            return;
        }
        v.destroyed = true;
        v.showing = false;
        v.begin_frame.set_paused(true);
        v.resize.reset();
        let (kind, parent, popup, child) = (v.kind, v.parent, v.popup.take(), v.child.take());

        for nested in [popup, child].into_iter().flatten() {
            self.cancel_widget(nested);
        }

        if let Some(parent) = parent
            && let Some(p) = self.views.get_mut(parent)
        {
            match kind {
                ViewKind::Popup if p.popup == Some(view) => {
                    p.popup = None;
                    self.handler.on_texture_paint(empty_popup_frame());
                    self.invalidate(parent);
                }
                ViewKind::Child if p.child == Some(view) => {
                    p.child = None;
                    self.show(parent);
                }
                _ => {}
            }
        }
        self.tasks.push_back(DeferredTask::ReleaseView(view));
    }

    /// Schedules [`cancel_widget`](Self::cancel_widget) for the next turn.
    ///
    /// Safe to call while input for `view` is being dispatched.
    pub fn request_cancel_widget(&mut self, view: ViewId) {
        self.tasks.push_back(DeferredTask::CancelWidget(view));
    }

    /// Runs the tasks queued before this call. Tasks they queue run on the
    /// next call. Returns the number of tasks run.
    pub fn run_pending_tasks(&mut self) -> usize {
        let tasks = core::mem::take(&mut self.tasks);
        let count = tasks.len();
        for task in tasks {
            match task {
                DeferredTask::CancelWidget(view) => self.cancel_widget(view),
                DeferredTask::ReissueResize(view, geometry) => {
                    if self.views.get(view).is_some_and(|v| !v.destroyed) {
                        self.apply_resize(view, geometry);
                        self.tracer().resize(&ResizeEvent {
                            action: ResizeAction::Reissued,
                            size: geometry.pixel_size(),
                        });
                    }
                }
                DeferredTask::ReleaseView(view) => {
                    self.views.remove(view);
                }
            }
        }
        count
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending_task_count(&self) -> usize {
        self.tasks.len()
    }

    // -- Geometry and surface identity --

    /// Sets the view size in DIPs.
    pub fn set_size(&mut self, view: ViewId, size: Size) {
        if let Some(v) = self.views.get_mut(view) {
            v.size = size;
            self.synchronize_geometry(view, false);
        }
    }

    /// Overrides the device scale factor. `0.0` returns to the screen's.
    pub fn set_manual_scale_factor(&mut self, view: ViewId, scale: f64) {
        if let Some(v) = self.views.get_mut(view) {
            v.manual_scale = scale.max(0.0);
            self.synchronize_geometry(view, false);
        }
    }

    /// Records the screen's scale factor without resynchronizing; follow
    /// with [`was_resized`](Self::was_resized).
    pub fn set_screen_scale_factor(&mut self, view: ViewId, scale: f64) {
        if let Some(v) = self.views.get_mut(view) {
            v.screen_scale = scale;
        }
    }

    /// Re-reads the view geometry after an external change.
    pub fn was_resized(&mut self, view: ViewId) {
        self.synchronize_geometry(view, false);
    }

    /// Re-synchronizes geometry, adopting the embedded child's identity
    /// generation when the geometry is unchanged.
    pub fn synchronize_visual_properties(
        &mut self,
        view: ViewId,
        child_identity: Option<LocalSurfaceId>,
    ) {
        let Some(v) = self.views.get_mut(view) else {
            return;
        };
        if v.resize.committed() == Some(v.geometry()) {
            if let Some(child) = child_identity
                && v.identity.update_from_child(&child)
            {
                self.trace_identity(view);
            }
        } else {
            self.synchronize_geometry(view, false);
        }
    }

    /// The renderer finished applying visual properties.
    ///
    /// A hidden view only adopts the child generation; a shown one
    /// re-synchronizes as well.
    pub fn on_did_update_visual_properties_complete(
        &mut self,
        view: ViewId,
        child_identity: LocalSurfaceId,
    ) {
        let Some(v) = self.views.get_mut(view) else {
            return;
        };
        if v.showing {
            self.synchronize_visual_properties(view, Some(child_identity));
        } else if v.identity.update_from_child(&child_identity) {
            self.trace_identity(view);
        }
    }

    /// The view navigated to a new document.
    ///
    /// A hidden view drops its identity so nothing is submitted under it;
    /// the next [`show`](Self::show) allocates a fresh one.
    pub fn did_navigate(&mut self, view: ViewId) {
        let Some(v) = self.views.get_mut(view) else {
            return;
        };
        if v.showing {
            self.synchronize_visual_properties(view, None);
        } else {
            v.identity.invalidate();
            self.trace_identity(view);
        }
    }

    fn synchronize_geometry(&mut self, view: ViewId, force: bool) {
        let Some(v) = self.views.get_mut(view).filter(|v| !v.destroyed) else {
            return;
        };
        let geometry = v.geometry();
        let action = match v.resize.request(geometry, force) {
            ResizeDecision::Apply(g) => {
                self.apply_resize(view, g);
                ResizeAction::Applied
            }
            ResizeDecision::Deferred => ResizeAction::Deferred,
            ResizeDecision::Unchanged => ResizeAction::Unchanged,
        };
        self.tracer().resize(&ResizeEvent {
            action,
            size: geometry.pixel_size(),
        });
    }

    fn apply_resize(&mut self, view: ViewId, geometry: SurfaceGeometry) {
        let Some(v) = self.views.get_mut(view) else {
            return;
        };
        v.compositor
            .set_geometry(geometry.pixel_size(), geometry.scale);
        let popup = v.popup;
        self.resize_output(view, geometry);
        self.allocate_identity(view);
        if let Some(popup) = popup
            && let Some(p) = self.views.get_mut(popup)
            && p.screen_scale != geometry.scale
        {
            p.screen_scale = geometry.scale;
            self.synchronize_geometry(popup, false);
        }
    }

    /// Reshapes the view's buffers, rebuilding a surface that failed.
    fn resize_output(&mut self, view: ViewId, geometry: SurfaceGeometry) {
        let Some(v) = self.views.get_mut(view) else {
            return;
        };
        let resized = match &mut v.output {
            Ok(output) => output
                .resize(geometry.pixel_size(), surface_scale(geometry.scale))
                .is_ok(),
            Err(_) => false,
        };
        if !resized {
            let rebuilt = self.build_output(geometry);
            if let Some(v) = self.views.get_mut(view) {
                v.output = rebuilt;
            }
        }
    }

    fn allocate_identity(&mut self, view: ViewId) {
        if let Some(v) = self.views.get_mut(view) {
            v.identity.allocate_new();
            self.trace_identity(view);
        }
    }

    fn trace_identity(&mut self, view: ViewId) {
        let Some(id) = self.views.get(view).map(|v| v.identity.current()) else {
            return;
        };
        self.tracer().surface_id(&SurfaceIdEvent {
            parent_sequence: id.parent_sequence,
            child_sequence: id.child_sequence,
            valid: id.is_valid(),
        });
    }

    /// Releases the resize hold if `delivered` matches the committed size.
    fn on_frame_delivered(&mut self, view: ViewId, delivered: PixelSize) {
        let Some(v) = self.views.get_mut(view) else {
            return;
        };
        let action = match v.resize.complete(delivered) {
            ResizeRelease::NotHeld | ResizeRelease::Mismatch => return,
            ResizeRelease::Released => ResizeAction::Released,
            ResizeRelease::Reissue(geometry) => {
                self.tasks
                    .push_back(DeferredTask::ReissueResize(view, geometry));
                ResizeAction::Released
            }
        };
        self.tracer().resize(&ResizeEvent {
            action,
            size: delivered,
        });
    }

    // -- Painting --

    /// Accepts a software frame for `view`.
    ///
    /// The bitmap becomes the view's backing store. A popup recomposites its
    /// parent with damage at the popup's pixel rect; any other view
    /// composites itself and delivers through [`PaintSink::on_paint`].
    pub fn on_paint(&mut self, view: ViewId, damage: PixelRect, bitmap: Bitmap) {
        let Some(v) = self.views.get_mut(view).filter(|v| !v.destroyed) else {
            return;
        };
        let delivered = bitmap.size();
        v.backing = bitmap;
        let (kind, parent, rect) = (v.kind, v.parent, v.popup_rect);
        self.on_frame_delivered(view, delivered);

        match (kind, parent) {
            (ViewKind::Popup, Some(parent)) => {
                let Some(scale) = self.views.get(parent).map(View::scale) else {
                    return;
                };
                self.composite_view(parent, PixelRect::enclosing(rect, scale));
            }
            _ => self.composite_view(view, damage),
        }
    }

    /// Accepts a GPU frame for `view` and forwards it to the handler.
    ///
    /// While painting is off, or for a dead view, the frame is released
    /// right away without a fence. Popup frames are marked as such and their
    /// content rect is moved to the popup's pixel position in the parent.
    pub fn on_texture_paint(&mut self, view: ViewId, mut frame: TextureFrame) {
        let Some(v) = self.views.get(view).filter(|v| !v.destroyed) else {
            frame.release.release(None);
            return;
        };
        let (kind, parent, rect) = (v.kind, v.parent, v.popup_rect);
        self.on_frame_delivered(view, frame.content_rect.size());
        if !self.painting {
            frame.release.release(None);
            return;
        }
        if kind == ViewKind::Popup {
            let scale = parent
                .and_then(|p| self.views.get(p))
                .map_or(1.0, View::scale);
            let at = PixelRect::enclosing(rect, scale);
            frame.content_rect = frame.content_rect.offset(at.x, at.y);
            frame.is_popup = true;
        }
        self.tracer().texture_delivered(&TextureDeliveredEvent {
            buffer: frame.buffer,
            content_rect: frame.content_rect,
            is_popup: frame.is_popup,
        });
        self.handler.on_texture_paint(frame);
    }

    /// Binds `view`'s next buffer and runs `paint` against it.
    ///
    /// Returns `Ok(None)` without calling `paint` if every buffer is held.
    /// A view whose surface failed reports that failure here until a resize
    /// rebuilds it.
    pub fn paint<R>(
        &mut self,
        view: ViewId,
        paint: impl FnOnce(&Binding) -> R,
    ) -> Result<Option<R>, SurfaceError> {
        self.live_output(view)?.paint(paint)
    }

    /// Presents `view`'s bound buffer.
    ///
    /// The frame takes the same route as one passed to
    /// [`on_texture_paint`](Self::on_texture_paint): it releases a resize
    /// hold of matching size, and a popup frame is moved into place.
    pub fn present(&mut self, view: ViewId) -> Result<Option<BufferHandle>, SurfaceError> {
        let mut presented = Presented(None);
        let buffer = self.live_output(view)?.present(&mut presented)?;
        if let Some(frame) = presented.0 {
            self.on_texture_paint(view, frame);
        }
        Ok(buffer)
    }

    /// Applies buffer releases for `view`. Returns the number of page flips
    /// acknowledged.
    pub fn process_releases(&mut self, view: ViewId) -> usize {
        self.live_output(view)
            .map_or(0, OffscreenOutput::process_releases)
    }

    /// The output presenting `view`, if its surface is healthy.
    #[must_use]
    pub fn output(&self, view: ViewId) -> Option<&OffscreenOutput<C, S>> {
        self.views.get(view)?.output.as_ref().ok()
    }

    fn live_output(&mut self, view: ViewId) -> Result<&mut OffscreenOutput<C, S>, SurfaceError> {
        let v = self
            .views
            .get_mut(view)
            .filter(|v| !v.destroyed)
            .ok_or(SurfaceError::Destroyed)?;
        v.output.as_mut().map_err(|e| *e)
    }

    /// Recomposites `view` with full damage.
    ///
    /// Invalidating a popup recomposites its parent.
    pub fn invalidate(&mut self, view: ViewId) {
        let Some(v) = self.views.get(view) else {
            return;
        };
        match (v.kind, v.parent) {
            (ViewKind::Popup, Some(parent)) => self.invalidate(parent),
            _ => {
                let full = PixelRect::from_size(v.compositor.size());
                self.composite_view(view, full);
            }
        }
    }

    /// Turns frame delivery on or off. Turning it on recomposites every
    /// shown view.
    pub fn set_painting(&mut self, painting: bool) {
        if self.painting == painting {
            return;
        }
        self.painting = painting;
        if painting {
            for id in self.views.ids() {
                if self.views.get(id).is_some_and(|v| v.showing && !v.destroyed) {
                    self.invalidate(id);
                }
            }
        }
    }

    /// Returns `true` while frames are delivered.
    #[must_use]
    pub fn is_painting(&self) -> bool {
        self.painting
    }

    /// Chooses between uploading proxy bitmaps as shared textures and
    /// compositing them in software.
    pub fn set_shared_texture_enabled(&mut self, enabled: bool) {
        self.shared_texture = enabled;
    }

    /// Sets the background color (premultiplied `0xAARRGGBB`).
    pub fn set_background_color(&mut self, color: u32) {
        self.background_color = color;
    }

    /// Background color.
    #[must_use]
    pub fn background_color(&self) -> u32 {
        self.background_color
    }

    /// Sets whether delivered frames keep their alpha.
    pub fn set_transparent(&mut self, transparent: bool) {
        self.transparent = transparent;
    }

    /// Returns `true` if delivered frames keep their alpha.
    #[must_use]
    pub fn is_transparent(&self) -> bool {
        self.transparent
    }

    fn composite_view(&mut self, view: ViewId, damage: PixelRect) {
        if !self.painting {
            return;
        }
        let Some(popup_id) = self.views.get(view).map(|v| v.popup) else {
            return;
        };
        let frame_index = self.frame_index;
        let start = self.now();
        let mut summary = FrameSummaryBuilder::new(frame_index, start);
        summary.phase_begin(PhaseKind::Composite, start);
        self.tracer().phase_begin(&PhaseBeginEvent {
            frame_index,
            phase: PhaseKind::Composite,
            timestamp: start,
        });

        // The popup's bitmap is borrowed out of its slot for the duration.
        let mut popup = popup_id.and_then(|p| {
            let p = self.views.get_mut(p)?;
            (p.showing && !p.destroyed).then(|| (core::mem::take(&mut p.backing), p.popup_rect))
        });
        let Some(v) = self.views.get_mut(view) else {
            return;
        };
        let layer = popup
            .as_ref()
            .map(|(bitmap, rect)| PopupLayer { bitmap, rect: *rect });
        let stats = v
            .compositor
            .deliver(&v.backing, damage, layer, &mut self.handler);
        if let (Some(p), Some((bitmap, _))) = (popup_id, popup.take())
            && let Some(p) = self.views.get_mut(p)
        {
            p.backing = bitmap;
        }

        let end = self.now();
        summary.phase_end(PhaseKind::Composite, end);
        summary.set_damage(stats.damage);
        self.frame_index += 1;
        let mut tracer = self.tracer();
        tracer.phase_end(&PhaseEndEvent {
            frame_index,
            phase: PhaseKind::Composite,
            timestamp: end,
        });
        tracer.composite(&CompositeEvent {
            frame_index,
            fast_path: stats.fast_path,
            overlays: stats.overlays,
            damage: stats.damage,
        });
        tracer.frame_summary(&summary.finish());
        #[cfg(feature = "trace-rich")]
        tracer.damage_rects(frame_index, &[stats.damage]);
    }

    // -- Proxies --

    /// Registers `proxy` over `view`.
    pub fn add_view_proxy(&mut self, view: ViewId, proxy: &ViewProxy) {
        if let Some(v) = self.views.get_mut(view) {
            v.compositor.proxies_mut().add_view_proxy(proxy);
        }
    }

    /// Unregisters `proxy` from `view` and repaints without it.
    pub fn remove_view_proxy(&mut self, view: ViewId, proxy: &ViewProxy) {
        let removed = self
            .views
            .get_mut(view)
            .is_some_and(|v| v.compositor.proxies_mut().remove_view_proxy(proxy));
        if removed {
            self.invalidate(view);
        }
    }

    /// Reacts to proxy paints and destructions reported since the last call.
    ///
    /// In software mode each event recomposites the view. In shared-texture
    /// mode a painted proxy is uploaded into a new shared image and delivered
    /// as a popup texture frame whose release destroys the image, and a
    /// destroyed proxy sends an empty popup frame.
    pub fn process_proxy_notifications(&mut self, view: ViewId) -> Result<usize, AllocError> {
        let Some(v) = self.views.get_mut(view) else {
            return Ok(0);
        };
        let notifications = v.compositor.proxies_mut().drain_notifications();
        let count = notifications.len();
        for notification in notifications {
            match (notification, self.shared_texture) {
                (ProxyNotification::Painted(id), true) => self.deliver_proxy_texture(view, id)?,
                (ProxyNotification::Destroyed(_), true) => {
                    self.handler.on_texture_paint(empty_popup_frame());
                }
                (ProxyNotification::Painted(id), false) => {
                    let rect = self
                        .views
                        .get(view)
                        .and_then(|v| v.compositor.proxies().snapshot(id))
                        .map(|(rect, _)| rect);
                    if let Some(rect) = rect {
                        self.composite_view(view, rect);
                    }
                }
                (ProxyNotification::Destroyed(_), false) => self.invalidate(view),
            }
        }
        Ok(count)
    }

    fn deliver_proxy_texture(&mut self, view: ViewId, proxy: ProxyId) -> Result<(), AllocError> {
        let Some((rect, bitmap)) = self
            .views
            .get(view)
            .and_then(|v| v.compositor.proxies().snapshot(proxy))
        else {
            return Ok(());
        };
        let buffer = self.shared_images.create_shared_image_with_data(
            BufferFormat::Bgra8888,
            bitmap.size(),
            ColorSpace::Srgb,
            BufferUsage::DISPLAY | BufferUsage::GPU_READ,
            bitmap.as_bytes(),
        )?;
        let sync_token = self.shared_images.gen_verified_sync_token();
        let shared_images = Rc::clone(&self.shared_images);
        let frame = TextureFrame {
            buffer,
            sync_token,
            content_rect: rect,
            is_popup: true,
            release: ReleaseCallback::new(move |token| {
                shared_images.destroy_shared_image(token.unwrap_or(SyncToken::EMPTY), buffer);
            }),
        };
        self.tracer().texture_delivered(&TextureDeliveredEvent {
            buffer,
            content_rect: rect,
            is_popup: true,
        });
        self.handler.on_texture_paint(frame);
        Ok(())
    }

    // -- Input --

    /// Picks the receiver of a pointer event at `point` (view DIPs): a proxy
    /// first, then the popup, then the view itself.
    #[must_use]
    pub fn route_pointer(&self, view: ViewId, point: Point) -> InputTarget {
        let Some(v) = self.views.get(view) else {
            return InputTarget::Primary { view, point };
        };
        if let Some((proxy, point)) = v.compositor.proxies().hit_test(point) {
            return InputTarget::Proxy { proxy, point };
        }
        if let Some(popup) = v.popup
            && let Some(p) = self.views.get(popup)
            && p.showing
            && p.popup_rect.contains(point)
        {
            return InputTarget::Popup {
                view: popup,
                point: point - p.popup_rect.origin().to_vec2(),
            };
        }
        InputTarget::Primary { view, point }
    }

    /// Routes a wheel event. Scrolling anywhere outside an open popup, over
    /// a proxy included, closes the popup on the next turn.
    pub fn send_mouse_wheel_event(&mut self, view: ViewId, point: Point) -> InputTarget {
        let target = self.route_pointer(view, point);
        if !matches!(target, InputTarget::Popup { .. })
            && let Some(popup) = self.views.get(view).and_then(|v| v.popup)
        {
            self.request_cancel_widget(popup);
        }
        target
    }

    // -- Frame pacing --

    /// Sets the frame rate of `view` and its popup, clamped to the
    /// configured range.
    pub fn set_frame_rate(&mut self, view: ViewId, hz: u32) {
        let rate = FrameRate::new(self.config.clamp_frame_rate(hz));
        let timebase = self.timebase;
        let Some(v) = self.views.get_mut(view) else {
            return;
        };
        v.frame_rate = rate;
        v.begin_frame.set_rate(rate, timebase);
        if let Some(popup) = v.popup
            && let Some(p) = self.views.get_mut(popup)
        {
            p.frame_rate = rate;
            p.begin_frame.set_rate(rate, timebase);
        }
    }

    /// Drives `view`'s begin-frame source.
    pub fn on_begin_frame_tick(&mut self, view: ViewId, now: HostTime) -> Option<BeginFrameArgs> {
        let args = self.views.get_mut(view)?.begin_frame.on_tick(now)?;
        self.tracer().begin_frame(&BeginFrameEvent {
            frame_index: args.frame_index,
            timestamp: args.frame_time,
            interval: args.interval,
        });
        Some(args)
    }

    /// Acknowledges `view`'s outstanding begin-frame.
    pub fn on_frame_ack(&mut self, view: ViewId) {
        if let Some(v) = self.views.get_mut(view) {
            v.begin_frame.on_frame_ack();
        }
    }

    // -- Queries --

    fn live(&self, view: ViewId) -> &View<C, S> {
        let Some(v) = self.views.get(view).filter(|v| !v.destroyed) else {
            panic!("stale view handle {view:?}");
        };
        v
    }

    fn live_mut(&mut self, view: ViewId) -> &mut View<C, S> {
        let Some(v) = self.views.get_mut(view).filter(|v| !v.destroyed) else {
            panic!("stale view handle {view:?}");
        };
        v
    }

    /// Returns `true` if `view` exists and has not been cancelled.
    #[must_use]
    pub fn is_alive(&self, view: ViewId) -> bool {
        self.views.get(view).is_some_and(|v| !v.destroyed)
    }

    /// Role of `view`.
    ///
    /// # Panics
    ///
    /// Panics if `view` is stale.
    #[must_use]
    pub fn kind(&self, view: ViewId) -> ViewKind {
        self.live(view).kind
    }

    /// Parent of a popup or child.
    #[must_use]
    pub fn parent(&self, view: ViewId) -> Option<ViewId> {
        self.views.get(view)?.parent
    }

    /// Open popup of `view`.
    #[must_use]
    pub fn popup(&self, view: ViewId) -> Option<ViewId> {
        self.views.get(view)?.popup
    }

    /// Child widget of `view`.
    #[must_use]
    pub fn child(&self, view: ViewId) -> Option<ViewId> {
        self.views.get(view)?.child
    }

    /// Returns `true` if `view` is alive and shown.
    #[must_use]
    pub fn is_showing(&self, view: ViewId) -> bool {
        self.views.get(view).is_some_and(|v| v.showing)
    }

    /// Effective device scale factor of `view`.
    ///
    /// # Panics
    ///
    /// Panics if `view` is stale.
    #[must_use]
    pub fn scale_factor(&self, view: ViewId) -> f64 {
        self.live(view).scale()
    }

    /// Frame rate of `view`.
    ///
    /// # Panics
    ///
    /// Panics if `view` is stale.
    #[must_use]
    pub fn frame_rate(&self, view: ViewId) -> FrameRate {
        self.live(view).frame_rate
    }

    /// Committed backing size of `view` in pixels.
    ///
    /// # Panics
    ///
    /// Panics if `view` is stale.
    #[must_use]
    pub fn pixel_size(&self, view: ViewId) -> PixelSize {
        self.live(view).compositor.size()
    }

    /// Resize hold state of `view`.
    ///
    /// # Panics
    ///
    /// Panics if `view` is stale.
    #[must_use]
    pub fn resize_state(&self, view: ViewId) -> ResizeState {
        self.live(view).resize.state()
    }

    /// Current surface of `view`; its local id is invalid after a hidden
    /// navigation until the next show.
    ///
    /// # Panics
    ///
    /// Panics if `view` is stale.
    #[must_use]
    pub fn surface_id(&self, view: ViewId) -> SurfaceId {
        let v = self.live(view);
        SurfaceId {
            frame_sink_id: v.frame_sink_id,
            local_surface_id: v.identity.current(),
        }
    }
}

/// Surfaces take their scale factor as `f32`.
#[expect(
    clippy::cast_possible_truncation,
    reason = "device scale factors are small and need no f64 precision"
)]
fn surface_scale(scale: f64) -> f32 {
    scale as f32
}

/// Tells the embedder to drop its popup layer.
fn empty_popup_frame() -> TextureFrame {
    TextureFrame {
        buffer: BufferHandle::ZERO,
        sync_token: SyncToken::EMPTY,
        content_rect: PixelRect::ZERO,
        is_popup: true,
        release: ReleaseCallback::noop(),
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use super::*;
    use crate::bitmap::{BLACK, WHITE};
    use crate::testing::FakeGpu;

    #[derive(Default)]
    struct Handler {
        paints: Vec<(PixelRect, Bitmap)>,
        textures: Vec<TextureFrame>,
    }

    impl PaintSink for Handler {
        fn on_paint(&mut self, damage: PixelRect, frame: &Bitmap) {
            self.paints.push((damage, frame.clone()));
        }
    }

    impl TextureSink for Handler {
        fn on_texture_paint(&mut self, frame: TextureFrame) {
            self.textures.push(frame);
        }
    }

    type Host = OffscreenHost<FakeGpu, FakeGpu, Handler>;

    fn host() -> (Rc<FakeGpu>, Host) {
        let gpu = Rc::new(FakeGpu::new());
        let host = OffscreenHost::new(
            HostConfig::DEFAULT,
            Timebase::NANOS,
            gpu.clone(),
            gpu.clone(),
            Handler::default(),
        );
        (gpu, host)
    }

    fn allocations(gpu: &FakeGpu) -> usize {
        gpu.calls()
            .iter()
            .filter(|c| **c == "create_shared_image")
            .count()
    }

    fn shown_root(host: &mut Host) -> ViewId {
        let root = host.create_root(Size::new(100.0, 100.0), 1.0);
        host.show(root);
        root
    }

    fn texture(size: PixelSize, released: &Rc<Cell<bool>>) -> TextureFrame {
        let flag = released.clone();
        TextureFrame {
            buffer: BufferHandle::from_u128(77),
            sync_token: SyncToken::EMPTY,
            content_rect: PixelRect::from_size(size),
            is_popup: false,
            release: ReleaseCallback::new(move |_| flag.set(true)),
        }
    }

    #[test]
    fn popup_replaces_previous_popup() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        let first = host.init_as_popup(root, Rect::new(10.0, 10.0, 30.0, 30.0));
        assert_eq!(host.popup(root), Some(first), "parent linked");
        assert_eq!(host.kind(first), ViewKind::Popup, "popup kind");

        let second = host.init_as_popup(root, Rect::new(0.0, 0.0, 5.0, 5.0));
        assert!(!host.is_alive(first), "old popup cancelled");
        assert_eq!(host.popup(root), Some(second), "parent relinked");
        assert_eq!(host.parent(second), Some(root), "back-reference");
    }

    #[test]
    fn cancel_widget_is_two_phase_and_idempotent() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        let popup = host.init_as_popup(root, Rect::new(10.0, 10.0, 30.0, 30.0));

        host.cancel_widget(popup);
        assert_eq!(host.popup(root), None, "parent cleared first");
        assert!(!host.is_alive(popup), "marked destroyed");
        let cleared = host.handler().textures.last().expect("empty popup frame");
        assert!(cleared.is_popup && cleared.buffer.is_zero(), "layer dropped");
        let frames = host.handler().textures.len();

        host.cancel_widget(popup);
        assert_eq!(host.handler().textures.len(), frames, "second cancel is a no-op");
        host.run_pending_tasks();
        host.cancel_widget(popup);
        assert_eq!(host.parent(popup), None, "slot freed");
        assert_eq!(host.handler().textures.len(), frames, "stale cancel is a no-op");
    }

    #[test]
    fn child_hides_parent_until_cancelled() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        let child = host.init_as_child(root);
        assert!(host.is_showing(child), "child shown");
        assert!(!host.is_showing(root), "parent hidden");
        host.cancel_widget(child);
        assert!(host.is_showing(root), "parent re-shown");
        assert_eq!(host.child(root), None, "link cleared");
    }

    #[test]
    fn popup_paint_composites_into_parent() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        host.on_paint(
            root,
            PixelRect::from_size(PixelSize::new(100, 100)),
            Bitmap::filled(PixelSize::new(100, 100), BLACK),
        );
        let popup = host.init_as_popup(root, Rect::new(10.0, 10.0, 30.0, 30.0));
        host.on_paint(
            popup,
            PixelRect::from_size(PixelSize::new(20, 20)),
            Bitmap::filled(PixelSize::new(20, 20), WHITE),
        );
        let (damage, frame) = host.handler().paints.last().expect("parent repainted");
        assert_eq!(frame.pixel(15, 15), Some(WHITE), "popup drawn");
        assert_eq!(frame.pixel(50, 50), Some(BLACK), "base kept");
        assert!(damage.contains_rect(PixelRect::new(10, 10, 20, 20)), "popup damage");
    }

    #[test]
    fn popup_texture_is_offset_and_flagged() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        host.set_manual_scale_factor(root, 2.0);
        let popup = host.init_as_popup(root, Rect::new(10.0, 5.0, 30.0, 25.0));
        assert_eq!(host.scale_factor(popup), 2.0, "scale inherited");

        let released = Rc::new(Cell::new(false));
        host.on_texture_paint(popup, texture(PixelSize::new(40, 40), &released));
        let frame = host.handler().textures.last().expect("forwarded");
        assert!(frame.is_popup, "flagged as popup");
        assert_eq!(frame.content_rect, PixelRect::new(20, 10, 40, 40), "moved to popup position");
        assert!(!released.get(), "embedder owns the release");
    }

    #[test]
    fn frames_released_immediately_while_not_painting() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        host.set_painting(false);
        let released = Rc::new(Cell::new(false));
        host.on_texture_paint(root, texture(PixelSize::new(100, 100), &released));
        assert!(released.get(), "released without delivery");
        assert!(host.handler().textures.is_empty(), "nothing delivered");
    }

    #[test]
    fn resize_burst_applies_twice() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        let released = Rc::new(Cell::new(false));
        host.on_texture_paint(root, texture(PixelSize::new(100, 100), &released));
        assert_eq!(host.resize_state(root), ResizeState::Idle, "initial hold released");

        let start = host.surface_id(root).local_surface_id.parent_sequence;
        for w in [110.0, 120.0, 130.0, 140.0, 150.0] {
            host.set_size(root, Size::new(w, 100.0));
        }
        assert_eq!(host.pixel_size(root), PixelSize::new(110, 100), "first applied");
        assert_eq!(host.resize_state(root), ResizeState::HeldPending, "rest deferred");

        host.on_texture_paint(root, texture(PixelSize::new(110, 100), &released));
        assert_eq!(host.pending_task_count(), 1, "re-issue queued");
        host.run_pending_tasks();
        assert_eq!(host.pixel_size(root), PixelSize::new(150, 100), "latest applied");
        assert_eq!(
            host.surface_id(root).local_surface_id.parent_sequence,
            start + 2,
            "exactly two new identities"
        );
    }

    #[test]
    fn resize_burst_reallocates_buffers_twice() {
        let (gpu, mut host) = host();
        let root = shown_root(&mut host);
        let released = Rc::new(Cell::new(false));
        host.on_texture_paint(root, texture(PixelSize::new(100, 100), &released));
        let allocated = allocations(&gpu);
        let reshaped = gpu.resizes().len();

        for w in [110.0, 120.0, 130.0, 140.0, 150.0] {
            host.set_size(root, Size::new(w, 100.0));
        }
        host.on_texture_paint(root, texture(PixelSize::new(110, 100), &released));
        host.run_pending_tasks();

        assert_eq!(allocations(&gpu) - allocated, 2, "one reallocation per applied resize");
        assert_eq!(
            gpu.resizes()[reshaped..],
            [(PixelSize::new(110, 100), 1.0), (PixelSize::new(150, 100), 1.0)],
            "buffer queue reshaped to the first and the latest size only"
        );
        let output = host.output(root).expect("healthy surface");
        let current = output.surface().current_buffer().expect("bound");
        assert_eq!(gpu.image_size(current), Some(PixelSize::new(150, 100)), "final size");
    }

    #[test]
    fn presented_frames_release_the_resize_hold() {
        let (gpu, mut host) = host();
        let root = shown_root(&mut host);
        assert_eq!(host.resize_state(root), ResizeState::Held, "first geometry held");

        let painted = host.paint(root, |binding| binding.buffer).expect("paint");
        let presented = host.present(root).expect("present");
        assert_eq!(presented, painted, "painted buffer presented");
        assert_eq!(host.resize_state(root), ResizeState::Idle, "hold released");

        let frame = host.handler_mut().textures.pop().expect("delivered");
        assert_eq!(
            frame.content_rect,
            PixelRect::from_size(PixelSize::new(100, 100)),
            "view-sized frame"
        );
        assert_eq!(gpu.image_size(frame.buffer), Some(PixelSize::new(100, 100)), "buffer size");
        frame.release.release(None);
        assert_eq!(host.process_releases(root), 1, "flip acknowledged");
    }

    #[test]
    fn presented_popup_frames_are_moved_into_place() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        let popup = host.init_as_popup(root, Rect::new(10.0, 5.0, 30.0, 25.0));
        host.present(popup).expect("present");
        let frame = host.handler().textures.last().expect("delivered");
        assert!(frame.is_popup, "flagged as popup");
        assert_eq!(frame.content_rect, PixelRect::new(10, 5, 20, 20), "at the popup rect");
    }

    #[test]
    fn cancelled_views_cannot_present() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        let popup = host.init_as_popup(root, Rect::new(0.0, 0.0, 5.0, 5.0));
        host.cancel_widget(popup);
        assert_eq!(host.present(popup), Err(SurfaceError::Destroyed), "dead view");
        assert_eq!(host.process_releases(popup), 0, "nothing to acknowledge");
    }

    #[test]
    fn empty_view_surface_is_built_by_the_first_real_resize() {
        let (_gpu, mut host) = host();
        let root = host.create_root(Size::ZERO, 1.0);
        host.show(root);
        assert_eq!(host.present(root), Err(SurfaceError::NoBuffer), "nothing to bind");

        let released = Rc::new(Cell::new(false));
        host.on_texture_paint(root, texture(PixelSize::ZERO, &released));
        host.set_size(root, Size::new(40.0, 30.0));
        assert!(host.output(root).is_some(), "surface rebuilt");
        assert!(host.present(root).expect("present").is_some(), "frame delivered");
    }

    #[test]
    fn hidden_navigation_invalidates_identity_until_shown() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        assert!(host.surface_id(root).is_valid(), "valid while shown");
        host.hide(root);
        host.did_navigate(root);
        assert!(!host.surface_id(root).local_surface_id.is_valid(), "invalidated");
        host.show(root);
        assert!(host.surface_id(root).is_valid(), "reallocated on show");
    }

    #[test]
    fn child_identity_adopted_when_geometry_unchanged() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        let current = host.surface_id(root).local_surface_id;
        let child = LocalSurfaceId {
            child_sequence: current.child_sequence + 3,
            ..current
        };
        host.synchronize_visual_properties(root, Some(child));
        let now = host.surface_id(root).local_surface_id;
        assert_eq!(now.parent_sequence, current.parent_sequence, "parent kept");
        assert_eq!(now.child_sequence, child.child_sequence, "child adopted");
    }

    #[test]
    fn wheel_outside_popup_closes_it_next_turn() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        let popup = host.init_as_popup(root, Rect::new(10.0, 10.0, 30.0, 30.0));

        let inside = host.send_mouse_wheel_event(root, Point::new(15.0, 15.0));
        assert_eq!(
            inside,
            InputTarget::Popup {
                view: popup,
                point: Point::new(5.0, 5.0)
            },
            "routed into popup space"
        );
        let outside = host.send_mouse_wheel_event(root, Point::new(80.0, 80.0));
        assert!(matches!(outside, InputTarget::Primary { .. }), "primary target");
        assert!(host.is_alive(popup), "not torn down during dispatch");
        host.run_pending_tasks();
        assert!(!host.is_alive(popup), "closed on the next turn");
    }

    #[test]
    fn wheel_over_proxy_outside_popup_closes_it() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        let popup = host.init_as_popup(root, Rect::new(0.0, 0.0, 20.0, 20.0));
        let proxy = ViewProxy::new(Rect::new(50.0, 50.0, 70.0, 70.0), 1.0);
        host.add_view_proxy(root, &proxy);

        let target = host.send_mouse_wheel_event(root, Point::new(60.0, 60.0));
        assert!(matches!(target, InputTarget::Proxy { .. }), "proxy receives the wheel");
        host.run_pending_tasks();
        assert!(!host.is_alive(popup), "popup closed");
    }

    #[test]
    fn proxies_take_input_first() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        host.init_as_popup(root, Rect::new(0.0, 0.0, 50.0, 50.0));
        let proxy = ViewProxy::new(Rect::new(20.0, 20.0, 40.0, 40.0), 1.0);
        host.add_view_proxy(root, &proxy);
        assert_eq!(
            host.route_pointer(root, Point::new(25.0, 30.0)),
            InputTarget::Proxy {
                proxy: proxy.id(),
                point: Point::new(5.0, 10.0)
            },
            "proxy wins over popup"
        );
    }

    #[test]
    fn proxy_bitmaps_upload_as_popup_textures() {
        let (gpu, mut host) = host();
        let root = shown_root(&mut host);
        host.set_shared_texture_enabled(true);
        let mut proxy = ViewProxy::new(Rect::new(5.0, 5.0, 15.0, 15.0), 1.0);
        host.add_view_proxy(root, &proxy);
        assert!(proxy.set_bitmap(Bitmap::filled(PixelSize::new(10, 10), WHITE)), "accepted");

        let surface_images = gpu.live_images();
        assert_eq!(host.process_proxy_notifications(root), Ok(1), "one paint");
        assert_eq!(gpu.live_images(), surface_images + 1, "uploaded");
        let frame = host.handler_mut().textures.pop().expect("delivered");
        assert!(frame.is_popup, "popup layer");
        assert!(frame.sync_token.verified_flush, "verified fence");
        assert_eq!(frame.content_rect, PixelRect::new(5, 5, 10, 10), "proxy bounds");
        frame.release.release(None);
        assert_eq!(gpu.live_images(), surface_images, "release destroys the upload");

        drop(proxy);
        assert_eq!(host.process_proxy_notifications(root), Ok(1), "destruction");
        let cleared = host.handler().textures.last().expect("empty frame");
        assert!(cleared.buffer.is_zero() && cleared.is_popup, "layer cleared");
    }

    #[test]
    fn proxy_paint_recomposites_in_software_mode() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        host.on_paint(
            root,
            PixelRect::from_size(PixelSize::new(100, 100)),
            Bitmap::filled(PixelSize::new(100, 100), BLACK),
        );
        let mut proxy = ViewProxy::new(Rect::new(5.0, 5.0, 15.0, 15.0), 1.0);
        host.add_view_proxy(root, &proxy);
        assert!(proxy.set_bitmap(Bitmap::filled(PixelSize::new(10, 10), WHITE)), "accepted");
        host.process_proxy_notifications(root).expect("no uploads");
        let (damage, frame) = host.handler().paints.last().expect("recomposited");
        assert_eq!(*damage, PixelRect::new(5, 5, 10, 10), "proxy damage");
        assert_eq!(frame.pixel(6, 6), Some(WHITE), "proxy drawn");
    }

    #[test]
    fn frame_rate_is_clamped_and_inherited() {
        let (_gpu, mut host) = host();
        let root = shown_root(&mut host);
        let popup = host.init_as_popup(root, Rect::new(0.0, 0.0, 5.0, 5.0));
        host.set_frame_rate(root, 1000);
        assert_eq!(host.frame_rate(root).hz(), 240, "clamped");
        assert_eq!(host.frame_rate(popup).hz(), 240, "popup follows");

        assert!(host.on_begin_frame_tick(root, HostTime(0)).is_some(), "first signal");
        assert!(host.on_begin_frame_tick(root, HostTime(u64::MAX / 2)).is_none(), "awaits ack");
        host.on_frame_ack(root);
        assert!(host.on_begin_frame_tick(root, HostTime(u64::MAX / 2)).is_some(), "resumes");
    }

    #[cfg(feature = "trace")]
    mod traced {
        use core::cell::RefCell;

        use super::*;
        use crate::trace::{FrameSummary, PhaseKind, TraceSink};

        #[derive(Default)]
        struct Log {
            phases: Vec<(PhaseKind, bool)>,
            summaries: Vec<FrameSummary>,
        }

        impl TraceSink for Log {
            fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
                self.phases.push((e.phase, true));
            }

            fn on_phase_end(&mut self, e: &PhaseEndEvent) {
                self.phases.push((e.phase, false));
            }

            fn on_frame_summary(&mut self, s: &FrameSummary) {
                self.summaries.push(*s);
            }
        }

        fn traced_host() -> (Host, ViewId, Rc<RefCell<Log>>) {
            let (_gpu, mut host) = host();
            let root = shown_root(&mut host);
            let log = Rc::new(RefCell::new(Log::default()));
            host.set_trace_sink(Some(log.clone()));
            let ticks = Rc::new(Cell::new(0_u64));
            host.set_clock(Some(Rc::new(move || {
                ticks.set(ticks.get() + 5);
                HostTime(ticks.get())
            })));
            (host, root, log)
        }

        #[test]
        fn software_frames_report_a_composite_phase() {
            let (mut host, root, log) = traced_host();
            host.on_paint(
                root,
                PixelRect::new(0, 0, 10, 10),
                Bitmap::filled(PixelSize::new(100, 100), BLACK),
            );
            let log = log.borrow();
            assert_eq!(
                log.phases,
                [(PhaseKind::Composite, true), (PhaseKind::Composite, false)],
                "one composite span"
            );
            let summary = log.summaries.last().expect("summary");
            assert_eq!(summary.composite_ticks, 5, "timed by the host clock");
            assert_eq!(summary.damage_area, 100, "delivered damage");
        }

        #[test]
        fn view_outputs_share_the_host_sink() {
            let (mut host, root, log) = traced_host();
            host.present(root).expect("present");
            let log = log.borrow();
            assert!(
                log.phases.contains(&(PhaseKind::Swap, false)),
                "swap traced through the host sink"
            );
            assert_eq!(log.summaries.len(), 1, "one delivered frame");
        }
    }
}
