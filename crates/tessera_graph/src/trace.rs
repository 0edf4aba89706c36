//! Property trace: the breadcrumb of what is being encoded or decoded.

use std::fmt;

/// One step of the path from a root object to the current value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceFrame {
    /// A bean of the named type.
    Bean(String),
    /// A named field of the enclosing bean.
    Field(String),
    /// A task, by path.
    Task(String),
    /// A registered task property of the given kind (`input`, `output`, ...).
    Property {
        /// The property kind.
        kind: &'static str,
        /// The property name.
        name: String,
    },
    /// Build logic of the named type, such as a flow action.
    BuildLogic(String),
    /// A work node group owner.
    Owner(String),
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceFrame::Bean(name) => write!(f, "bean '{name}'"),
            TraceFrame::Field(name) => write!(f, "field '{name}'"),
            TraceFrame::Task(path) => write!(f, "task '{path}'"),
            TraceFrame::Property { kind, name } => write!(f, "{kind} property '{name}'"),
            TraceFrame::BuildLogic(name) => write!(f, "build logic '{name}'"),
            TraceFrame::Owner(path) => write!(f, "nodes of '{path}'"),
        }
    }
}

/// The active stack of trace frames, outermost first.
#[derive(Clone, Debug, Default)]
pub struct PropertyTrace {
    frames: Vec<TraceFrame>,
}

impl PropertyTrace {
    /// Creates an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a frame.
    pub fn push(&mut self, frame: TraceFrame) {
        self.frames.push(frame);
    }

    /// Pops the innermost frame.
    pub fn pop(&mut self) -> Option<TraceFrame> {
        self.frames.pop()
    }

    /// Returns the number of frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if no frame is active.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Renders the trace innermost first, e.g.
    /// `field 'next' of bean 'Link' of task ':app:compile'`.
    pub fn render(&self) -> String {
        self.frames
            .iter()
            .rev()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" of ")
    }
}
