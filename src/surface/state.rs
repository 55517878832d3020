//! Page surface lifecycle state

use super::geometry::{Size, SizeF};

/// Lifecycle phase of a page surface
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No page yet
    Empty,
    /// Placeholder for a page that is not set yet; busy indicator shown
    Blank,
    /// Full-page render in flight for a new page
    LoadingFull,
    /// Full page presented, or its render settled with a failure
    Ready,
    /// Released; every further command is ignored
    Disposed,
}

/// Current page and lifecycle of a surface
#[derive(Clone, Debug)]
pub struct SurfaceState {
    phase: Phase,
    page: Option<usize>,
    page_size: Option<SizeF>,
    parent_size: Size,
    /// Bumped on every page identity change; tags text and link lookups
    generation: u64,
}

impl SurfaceState {
    #[must_use]
    pub fn new(parent_size: Size) -> Self {
        Self {
            phase: Phase::Empty,
            page: None,
            page_size: None,
            parent_size,
            generation: 0,
        }
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        if self.phase == Phase::Disposed {
            return vec![];
        }

        match cmd {
            Command::SetPage { page, size } => {
                self.page = Some(page);
                self.page_size = Some(size);
                self.generation += 1;
                self.phase = Phase::LoadingFull;
                vec![
                    Effect::CancelFull,
                    Effect::DiscardPatch,
                    Effect::ResetPageData,
                    Effect::Relayout,
                    Effect::ClearPresentation,
                    Effect::RenderFull { incremental: false },
                    Effect::ExtractLinks,
                ]
            }

            Command::Blank(page) => {
                self.page = Some(page);
                self.page_size = None;
                self.generation += 1;
                self.phase = Phase::Blank;
                vec![
                    Effect::CancelFull,
                    Effect::DiscardPatch,
                    Effect::ResetPageData,
                    Effect::Relayout,
                    Effect::ClearPresentation,
                ]
            }

            Command::Update => match self.phase {
                Phase::LoadingFull | Phase::Ready => vec![
                    Effect::RenderFull { incremental: true },
                    Effect::RefreshPatch,
                ],
                _ => vec![],
            },

            Command::Redraw => match self.phase {
                Phase::LoadingFull | Phase::Ready => vec![
                    Effect::RenderFull { incremental: false },
                    Effect::DiscardPatch,
                    Effect::RefreshPatch,
                ],
                _ => vec![],
            },

            Command::SetParentSize(size) => {
                if self.parent_size == size {
                    return vec![];
                }
                self.parent_size = size;
                match self.phase {
                    Phase::LoadingFull | Phase::Ready => vec![
                        Effect::DiscardPatch,
                        Effect::Relayout,
                        Effect::RenderFull { incremental: false },
                    ],
                    _ => vec![],
                }
            }

            Command::FullRendered => match self.phase {
                Phase::LoadingFull | Phase::Ready => {
                    self.phase = Phase::Ready;
                    vec![Effect::PresentFull]
                }
                _ => vec![],
            },

            Command::FullFailed => {
                if self.phase == Phase::LoadingFull {
                    self.phase = Phase::Ready;
                }
                vec![]
            }

            Command::Release => {
                self.phase = Phase::Disposed;
                vec![
                    Effect::CancelFull,
                    Effect::DiscardPatch,
                    Effect::ResetPageData,
                    Effect::ReleaseBuffers,
                ]
            }
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn page(&self) -> Option<usize> {
        self.page
    }

    #[must_use]
    pub fn page_size(&self) -> Option<SizeF> {
        self.page_size
    }

    #[must_use]
    pub fn parent_size(&self) -> Size {
        self.parent_size
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.phase == Phase::Disposed
    }

    /// Page content is expected or shown
    #[must_use]
    pub fn has_page(&self) -> bool {
        matches!(self.phase, Phase::LoadingFull | Phase::Ready)
    }
}

/// Commands that modify surface state
#[derive(Clone, Debug)]
pub enum Command {
    /// Show a new page
    SetPage { page: usize, size: SizeF },
    /// Show a placeholder for a page
    Blank(usize),
    /// Re-render after annotation or overlay changes
    Update,
    /// Re-render from scratch after pixels were taken away
    Redraw,
    /// Parent viewport resized
    SetParentSize(Size),
    /// The active full-page task completed
    FullRendered,
    /// The active full-page task failed
    FullFailed,
    /// Dispose the surface
    Release,
}

/// Effects produced by state changes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Cancel-and-wait the full-page task
    CancelFull,
    /// Cancel the patch task and drop the tile
    DiscardPatch,
    /// Drop text, links, selection, ink and search boxes of the old page
    ResetPageData,
    /// Recompute display scale and size
    Relayout,
    /// Stop presenting the full-page buffer
    ClearPresentation,
    /// Submit a full-page render
    RenderFull { incremental: bool },
    /// Start link extraction
    ExtractLinks,
    /// Composite overlays and swap the finished buffer in
    PresentFull,
    /// Forced patch refresh for the current view
    RefreshPatch,
    /// Release every pixel buffer
    ReleaseBuffers,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> SurfaceState {
        SurfaceState::new(Size::new(500, 800))
    }

    fn set_page(page: usize) -> Command {
        Command::SetPage {
            page,
            size: SizeF::new(1000.0, 1500.0),
        }
    }

    #[test]
    fn set_page_starts_loading() {
        let mut state = test_state();
        let effects = state.apply(set_page(3));

        assert_eq!(state.phase(), Phase::LoadingFull);
        assert_eq!(state.page(), Some(3));
        assert_eq!(state.generation(), 1);
        assert_eq!(effects[0], Effect::CancelFull);
        assert!(effects.contains(&Effect::RenderFull { incremental: false }));
        assert!(effects.contains(&Effect::ExtractLinks));
    }

    #[test]
    fn completion_moves_to_ready_and_presents() {
        let mut state = test_state();
        let _ = state.apply(set_page(0));

        let effects = state.apply(Command::FullRendered);
        assert_eq!(state.phase(), Phase::Ready);
        assert_eq!(effects, vec![Effect::PresentFull]);
    }

    #[test]
    fn failure_settles_without_presenting() {
        let mut state = test_state();
        let _ = state.apply(set_page(0));

        assert!(state.apply(Command::FullFailed).is_empty());
        assert_eq!(state.phase(), Phase::Ready);
    }

    #[test]
    fn update_is_incremental_and_refreshes_patch() {
        let mut state = test_state();
        assert!(state.apply(Command::Update).is_empty());

        let _ = state.apply(set_page(0));
        let _ = state.apply(Command::FullRendered);
        assert_eq!(
            state.apply(Command::Update),
            vec![
                Effect::RenderFull { incremental: true },
                Effect::RefreshPatch
            ]
        );
        assert_eq!(state.phase(), Phase::Ready);
    }

    #[test]
    fn blank_records_page_and_bumps_generation() {
        let mut state = test_state();
        let _ = state.apply(set_page(0));
        let effects = state.apply(Command::Blank(7));

        assert_eq!(state.phase(), Phase::Blank);
        assert_eq!(state.page(), Some(7));
        assert_eq!(state.generation(), 2);
        assert!(effects.contains(&Effect::ClearPresentation));
        assert!(effects.contains(&Effect::Relayout));
        assert!(state.page_size().is_none());
        assert!(!effects.iter().any(|e| matches!(e, Effect::RenderFull { .. })));
    }

    #[test]
    fn redraw_needs_a_page() {
        let mut state = test_state();
        assert!(state.apply(Command::Redraw).is_empty());

        let _ = state.apply(set_page(0));
        let _ = state.apply(Command::FullRendered);
        assert_eq!(
            state.apply(Command::Redraw),
            vec![
                Effect::RenderFull { incremental: false },
                Effect::DiscardPatch,
                Effect::RefreshPatch
            ]
        );

        let _ = state.apply(Command::Blank(1));
        assert!(state.apply(Command::Redraw).is_empty());
        assert_eq!(state.phase(), Phase::Blank);
    }

    #[test]
    fn late_full_render_after_blank_is_not_presented() {
        let mut state = test_state();
        let _ = state.apply(set_page(0));
        let _ = state.apply(Command::Blank(1));

        assert!(state.apply(Command::FullRendered).is_empty());
        assert_eq!(state.phase(), Phase::Blank);
    }

    #[test]
    fn parent_resize_rerenders_only_with_page() {
        let mut state = test_state();
        assert!(state.apply(Command::SetParentSize(Size::new(600, 900))).is_empty());
        assert_eq!(state.parent_size(), Size::new(600, 900));

        let _ = state.apply(set_page(0));
        assert!(state.apply(Command::SetParentSize(Size::new(600, 900))).is_empty());
        let effects = state.apply(Command::SetParentSize(Size::new(700, 900)));
        assert!(effects.contains(&Effect::Relayout));
    }

    #[test]
    fn release_is_terminal_and_idempotent() {
        let mut state = test_state();
        let _ = state.apply(set_page(0));

        let effects = state.apply(Command::Release);
        assert!(effects.contains(&Effect::ReleaseBuffers));
        assert!(state.is_disposed());

        assert!(state.apply(Command::Release).is_empty());
        assert!(state.apply(set_page(1)).is_empty());
        assert_eq!(state.page(), Some(0));
    }
}
