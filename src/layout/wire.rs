use subgeom::{Rect, Span};

use super::cell::Transform;
use super::grid::{LayerId, RoutingDir};

/// A wire segment centered on a routing track.
///
/// `span` is the extent along the routing direction, `center` the coordinate
/// of the track across it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WireArray {
    layer: LayerId,
    dir: RoutingDir,
    center: i64,
    line: i64,
    span: Span,
}

impl WireArray {
    pub fn new(layer: LayerId, dir: RoutingDir, center: i64, line: i64, span: Span) -> Self {
        Self {
            layer,
            dir,
            center,
            line,
            span,
        }
    }

    #[inline]
    pub fn layer(&self) -> LayerId {
        self.layer
    }

    #[inline]
    pub fn dir(&self) -> RoutingDir {
        self.dir
    }

    #[inline]
    pub fn center(&self) -> i64 {
        self.center
    }

    #[inline]
    pub fn line(&self) -> i64 {
        self.line
    }

    #[inline]
    pub fn span(&self) -> Span {
        self.span
    }

    #[inline]
    pub fn lower(&self) -> i64 {
        self.span.start()
    }

    #[inline]
    pub fn upper(&self) -> i64 {
        self.span.stop()
    }

    /// The midpoint of the wire along its routing direction.
    #[inline]
    pub fn middle(&self) -> i64 {
        self.span.center()
    }

    pub fn bbox(&self) -> Rect {
        let cross = Span::new(self.center - self.line / 2, self.center + self.line / 2);
        match self.dir {
            RoutingDir::Horiz => Rect::from_spans(self.span, cross),
            RoutingDir::Vert => Rect::from_spans(cross, self.span),
        }
    }

    pub fn with_span(&self, span: Span) -> Self {
        Self { span, ..*self }
    }

    /// Extends the wire so that it reaches `lower` and `upper`, if given.
    pub fn extended(&self, lower: Option<i64>, upper: Option<i64>) -> Self {
        let start = lower.map_or(self.lower(), |l| l.min(self.lower()));
        let stop = upper.map_or(self.upper(), |u| u.max(self.upper()));
        self.with_span(Span::new(start, stop))
    }

    /// Extends the wire so that it covers the coordinate `coord`.
    pub fn covering(&self, coord: i64) -> Self {
        self.extended(Some(coord), Some(coord))
    }

    pub fn transform(&self, xf: &Transform) -> Self {
        match self.dir {
            RoutingDir::Horiz => Self {
                center: xf.y(self.center),
                span: xf.hspan(self.span),
                ..*self
            },
            RoutingDir::Vert => Self {
                center: xf.x(self.center),
                span: xf.vspan(self.span),
                ..*self
            },
        }
    }
}
