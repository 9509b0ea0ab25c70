//! Pointer shape classification.
//!
//! The sampler streams free-form tokens; they are resolved against a closed
//! table into `CursorShape`, with `Custom` covering anything unrecognized
//! (including the sampler's own `Hidden`/`Error` markers).

use std::fmt;

use serde::Serialize;

/// Closed set of pointer shapes the render surface knows how to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum CursorShape {
    #[default]
    Arrow,
    Hand,
    IBeam,
    Wait,
    Cross,
    SizeNS,
    SizeWE,
    SizeNWSE,
    SizeNESW,
    SizeAll,
    No,
    Help,
    AppStarting,
    Pen,
    Person,
    Pin,
    UpArrow,
    Custom,
}

impl CursorShape {
    /// Resolves a sampler token. Matching is case-insensitive and accepts the
    /// Windows `IDC_*` names as well as X11 cursor-font names.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "arrow" | "default" | "left_ptr" => Self::Arrow,
            "hand" | "pointer" | "hand1" | "hand2" | "pointing_hand" => Self::Hand,
            "ibeam" | "text" | "xterm" => Self::IBeam,
            "wait" | "watch" => Self::Wait,
            "cross" | "crosshair" | "tcross" => Self::Cross,
            "sizens" | "ns-resize" | "sb_v_double_arrow" | "v_double_arrow" => Self::SizeNS,
            "sizewe" | "ew-resize" | "sb_h_double_arrow" | "h_double_arrow" => Self::SizeWE,
            "sizenwse" | "nwse-resize" | "bottom_right_corner" | "top_left_corner" => {
                Self::SizeNWSE
            }
            "sizenesw" | "nesw-resize" | "bottom_left_corner" | "top_right_corner" => {
                Self::SizeNESW
            }
            "sizeall" | "move" | "fleur" => Self::SizeAll,
            "no" | "not-allowed" | "crossed_circle" => Self::No,
            "help" | "question_arrow" => Self::Help,
            "appstarting" | "progress" | "left_ptr_watch" => Self::AppStarting,
            "pen" | "pencil" => Self::Pen,
            "person" => Self::Person,
            "pin" => Self::Pin,
            "uparrow" | "up-arrow" | "sb_up_arrow" => Self::UpArrow,
            _ => Self::Custom,
        }
    }

    /// CSS `cursor` value the render surface applies.
    pub fn css(self) -> &'static str {
        match self {
            Self::Arrow | Self::UpArrow | Self::Pen | Self::Person | Self::Pin | Self::Custom => {
                "default"
            }
            Self::Hand => "pointer",
            Self::IBeam => "text",
            Self::Wait => "wait",
            Self::AppStarting => "progress",
            Self::Help => "help",
            Self::Cross => "crosshair",
            Self::No => "not-allowed",
            Self::SizeNS => "ns-resize",
            Self::SizeWE => "ew-resize",
            Self::SizeNWSE => "nwse-resize",
            Self::SizeNESW => "nesw-resize",
            Self::SizeAll => "move",
        }
    }

    /// Windows system cursor file for this shape.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Arrow | Self::Custom => "aero_arrow.cur",
            Self::AppStarting => "aero_working.ani",
            Self::Wait => "aero_busy.ani",
            Self::Hand => "aero_link.cur",
            Self::Help => "aero_helpsel.cur",
            Self::IBeam => "aero_ibeam.cur",
            Self::Cross => "cross.cur",
            Self::No => "aero_unavail.cur",
            Self::SizeNS => "aero_ns.cur",
            Self::SizeWE => "aero_ew.cur",
            Self::SizeNWSE => "aero_nwse.cur",
            Self::SizeNESW => "aero_nesw.cur",
            Self::SizeAll => "aero_move.cur",
            Self::UpArrow => "aero_up.cur",
            Self::Pen => "aero_pen.cur",
            Self::Person => "aero_person.cur",
            Self::Pin => "aero_pin.cur",
        }
    }
}

impl fmt::Display for CursorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// Deduplicating view over the sampler's token stream.
///
/// Holds the last emitted token and whether the sampler is still alive. When
/// the sampler dies the last shape is kept indefinitely.
#[derive(Debug, Default)]
pub struct ShapeFeed {
    last_token: Option<String>,
    current: CursorShape,
    active: bool,
}

impl ShapeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_active(&mut self) {
        self.active = true;
    }

    pub fn mark_inactive(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Last known shape; `Arrow` until the first token arrives.
    pub fn current(&self) -> CursorShape {
        self.current
    }

    /// Feeds one raw token. Returns the new shape only when the token differs
    /// from the previously observed one. Blank tokens are ignored.
    pub fn observe(&mut self, token: &str) -> Option<CursorShape> {
        let token = token.trim();
        if token.is_empty() || self.last_token.as_deref() == Some(token) {
            return None;
        }

        self.last_token = Some(token.to_owned());
        self.current = CursorShape::from_token(token);
        Some(self.current)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
