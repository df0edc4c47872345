// Copyright 2026 the Flipsync Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The closed set of pipeline insertion points.

use core::fmt;
use core::str::FromStr;

use crate::error::Error;

/// A fixed location in the presentation pipeline where a hook chain runs.
///
/// Blit points transform an image from a source buffer into a destination
/// buffer and fall back to a default copy (or stereo merge) when their chain
/// is empty or disabled. The remaining points only notify: their stages see
/// the current buffer bindings but nothing is copied on their behalf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HookPoint {
    /// Runs on close, before the drawing context is torn down.
    CloseWindowPreGlShutdown,
    /// Runs on close, after the drawing context is gone.
    CloseWindowPostGlShutdown,
    /// Runs at the start of pre-flip processing, once the client is done
    /// drawing.
    UserspaceBufferDrawingFinished,
    /// Processes the left (or only) view.
    StereoLeftCompositingBlit,
    /// Processes the right view.
    StereoRightCompositingBlit,
    /// Merges both views for packed stereo modes.
    StereoCompositingBlit,
    /// Processes each output image after any stereo merge.
    PostCompositingBlit,
    /// Formats the output into the system backbuffer.
    FinalOutputFormattingBlit,
    /// Runs after the flip, before the client starts drawing the next frame.
    UserspaceBufferDrawingPrepare,
    /// Plain buffer copies made by the engine, such as content preservation.
    IdentityBlit,
    /// Touches the left backbuffer after final formatting.
    LeftFinalizerBlit,
    /// Touches the right backbuffer after final formatting.
    RightFinalizerBlit,
    /// Runs only when the client explicitly asks for it.
    UserDefinedBlit,
}

/// What a point does when its chain is empty or disabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefaultAction {
    /// Nothing.
    Nothing,
    /// Copy source to destination.
    Copy,
    /// Merge both views into the destination according to the stereo mode.
    StereoMerge,
}

impl HookPoint {
    /// Number of hook points.
    pub const COUNT: usize = 13;

    /// Every hook point in pipeline order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::CloseWindowPreGlShutdown,
        Self::CloseWindowPostGlShutdown,
        Self::UserspaceBufferDrawingFinished,
        Self::StereoLeftCompositingBlit,
        Self::StereoRightCompositingBlit,
        Self::StereoCompositingBlit,
        Self::PostCompositingBlit,
        Self::FinalOutputFormattingBlit,
        Self::UserspaceBufferDrawingPrepare,
        Self::IdentityBlit,
        Self::LeftFinalizerBlit,
        Self::RightFinalizerBlit,
        Self::UserDefinedBlit,
    ];

    /// Index into per-point arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The point's name as accepted by [`from_name`](Self::from_name).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CloseWindowPreGlShutdown => "CloseWindowPreGlShutdown",
            Self::CloseWindowPostGlShutdown => "CloseWindowPostGlShutdown",
            Self::UserspaceBufferDrawingFinished => "UserspaceBufferDrawingFinished",
            Self::StereoLeftCompositingBlit => "StereoLeftCompositingBlit",
            Self::StereoRightCompositingBlit => "StereoRightCompositingBlit",
            Self::StereoCompositingBlit => "StereoCompositingBlit",
            Self::PostCompositingBlit => "PostCompositingBlit",
            Self::FinalOutputFormattingBlit => "FinalOutputFormattingBlit",
            Self::UserspaceBufferDrawingPrepare => "UserspaceBufferDrawingPrepare",
            Self::IdentityBlit => "IdentityBlit",
            Self::LeftFinalizerBlit => "LeftFinalizerBlit",
            Self::RightFinalizerBlit => "RightFinalizerBlit",
            Self::UserDefinedBlit => "UserDefinedBlit",
        }
    }

    /// One-line description for listings.
    #[must_use]
    pub const fn synopsis(self) -> &'static str {
        match self {
            Self::CloseWindowPreGlShutdown => {
                "Executed when the window is closed, before its drawing context goes away."
            }
            Self::CloseWindowPostGlShutdown => {
                "Executed when the window is closed, after its drawing context went away."
            }
            Self::UserspaceBufferDrawingFinished => {
                "Executed when client drawing for the current frame is finished."
            }
            Self::StereoLeftCompositingBlit => {
                "Processes the left-eye (or mono) image before stereo merging."
            }
            Self::StereoRightCompositingBlit => {
                "Processes the right-eye image before stereo merging."
            }
            Self::StereoCompositingBlit => {
                "Merges left and right images into one. Defaults to the mode's packing."
            }
            Self::PostCompositingBlit => "Processes each output image after stereo merging.",
            Self::FinalOutputFormattingBlit => {
                "Formats the final image into the system backbuffer. Defaults to a copy."
            }
            Self::UserspaceBufferDrawingPrepare => {
                "Executed after the flip, before client drawing for the next frame."
            }
            Self::IdentityBlit => "Plain buffer copies made by the engine.",
            Self::LeftFinalizerBlit => "Final touch-up of the left backbuffer before the swap.",
            Self::RightFinalizerBlit => "Final touch-up of the right backbuffer before the swap.",
            Self::UserDefinedBlit => "Runs only on explicit request by the client.",
        }
    }

    /// Looks up a point by name, ignoring ASCII case. A trailing `Chain`
    /// suffix is accepted.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let stem = name
            .len()
            .checked_sub(5)
            .filter(|&at| name.is_char_boundary(at) && name[at..].eq_ignore_ascii_case("chain"))
            .map_or(name, |at| &name[..at]);
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(stem))
    }

    /// Whether the point transforms an image from source to destination.
    #[must_use]
    pub const fn is_blit(self) -> bool {
        !matches!(self.default_action(), DefaultAction::Nothing)
    }

    /// What runs when the chain is empty or disabled.
    #[must_use]
    pub const fn default_action(self) -> DefaultAction {
        match self {
            Self::StereoLeftCompositingBlit
            | Self::StereoRightCompositingBlit
            | Self::PostCompositingBlit
            | Self::FinalOutputFormattingBlit
            | Self::IdentityBlit
            | Self::UserDefinedBlit => DefaultAction::Copy,
            Self::StereoCompositingBlit => DefaultAction::StereoMerge,
            Self::CloseWindowPreGlShutdown
            | Self::CloseWindowPostGlShutdown
            | Self::UserspaceBufferDrawingFinished
            | Self::UserspaceBufferDrawingPrepare
            | Self::LeftFinalizerBlit
            | Self::RightFinalizerBlit => DefaultAction::Nothing,
        }
    }

    /// Whether shader stages may be attached here.
    ///
    /// Close points run without a drawing context.
    #[must_use]
    pub const fn accepts_shaders(self) -> bool {
        !matches!(self, Self::CloseWindowPostGlShutdown)
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HookPoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| Error::UnknownHookPoint(s.into()))
    }
}
