//! Draw-state change tracking
//!
//! Consecutive draws usually share cull mode, viewport and pipeline. The
//! tracker remembers what the open render pass last saw so the renderer only
//! records the transitions a draw actually needs.

use crate::render::api::{CullMode, Extent2D, Rect2D, Viewport};
use crate::render::primitives::ViewPort;

/// State of the render pass currently being recorded
#[derive(Debug, Clone, PartialEq)]
pub struct DrawState {
    start_pass: bool,
    cull_mode: Option<CullMode>,
    viewport: Option<ViewPort>,
    pipeline: Option<usize>,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            start_pass: true,
            cull_mode: None,
            viewport: None,
            pipeline: None,
        }
    }
}

impl DrawState {
    /// A state with no render pass open
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the next draw has to open a render pass
    pub fn needs_pass_start(&self) -> bool {
        self.start_pass
    }

    /// Mark the render pass as open. Everything tracked is forgotten so the
    /// first draw records every state.
    pub fn begin_pass(&mut self) {
        self.start_pass = false;
        self.cull_mode = None;
        self.viewport = None;
        self.pipeline = None;
    }

    /// Mark the frame as presented
    pub fn end_pass(&mut self) {
        self.start_pass = true;
    }

    /// Record `mode`, returning whether it differs from the current one
    pub fn transition_cull_mode(&mut self, mode: CullMode) -> bool {
        transition(&mut self.cull_mode, mode)
    }

    /// Record `viewport`, returning whether it differs from the current one
    pub fn transition_viewport(&mut self, viewport: ViewPort) -> bool {
        transition(&mut self.viewport, viewport)
    }

    /// Record `pipeline`, returning whether it differs from the bound one
    pub fn transition_pipeline(&mut self, pipeline: usize) -> bool {
        transition(&mut self.pipeline, pipeline)
    }

    /// Pipeline id bound in the open pass
    pub fn bound_pipeline(&self) -> Option<usize> {
        self.pipeline
    }
}

fn transition<T: PartialEq>(current: &mut Option<T>, next: T) -> bool {
    if current.as_ref() == Some(&next) {
        return false;
    }
    *current = Some(next);
    true
}

/// Cull mode for an object's backface culling flag
pub fn cull_mode_for(backface_culling: bool) -> CullMode {
    if backface_culling {
        CullMode::Back
    } else {
        CullMode::None
    }
}

/// Device viewport and scissor covering a camera viewport
pub fn viewport_and_scissor(viewport: &ViewPort) -> (Viewport, Rect2D) {
    (
        Viewport {
            x: viewport.pos_x,
            y: viewport.pos_y,
            width: viewport.width,
            height: viewport.height,
        },
        Rect2D {
            x: viewport.pos_x as i32,
            y: viewport.pos_y as i32,
            extent: Extent2D::new(viewport.width as u32, viewport.height as u32),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_needs_pass() {
        let mut state = DrawState::new();
        assert!(state.needs_pass_start());
        state.begin_pass();
        assert!(!state.needs_pass_start());
        state.end_pass();
        assert!(state.needs_pass_start());
    }

    #[test]
    fn test_transitions_only_on_change() {
        let mut state = DrawState::new();
        state.begin_pass();

        assert!(state.transition_cull_mode(CullMode::Back));
        assert!(!state.transition_cull_mode(CullMode::Back));
        assert!(state.transition_cull_mode(CullMode::None));

        let vp = ViewPort::new(800.0, 600.0);
        assert!(state.transition_viewport(vp));
        assert!(!state.transition_viewport(vp));
        assert!(state.transition_viewport(ViewPort::new(400.0, 600.0)));

        assert!(state.transition_pipeline(0));
        assert!(!state.transition_pipeline(0));
        assert_eq!(state.bound_pipeline(), Some(0));
    }

    #[test]
    fn test_begin_pass_forgets_state() {
        let mut state = DrawState::new();
        state.begin_pass();
        state.transition_pipeline(2);
        state.end_pass();
        state.begin_pass();
        assert_eq!(state.bound_pipeline(), None);
        assert!(state.transition_pipeline(2));
    }

    #[test]
    fn test_viewport_and_scissor_match() {
        let vp = ViewPort { pos_x: 10.0, pos_y: 20.0, width: 300.0, height: 200.0 };
        let (viewport, scissor) = viewport_and_scissor(&vp);
        assert_eq!(viewport.x, 10.0);
        assert_eq!(viewport.height, 200.0);
        assert_eq!(scissor.x, 10);
        assert_eq!(scissor.extent, Extent2D::new(300, 200));
    }
}
