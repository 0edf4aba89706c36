//! Configured tasks and their registered properties.

use std::fmt;
use tessera_common::Path;
use tessera_graph::{ObjectRef, Value};

/// How a file property's value is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilePropertyType {
    /// A single file.
    File,
    /// A single directory.
    Directory,
    /// Any number of files.
    Files,
    /// Any number of directories.
    Directories,
}

impl FilePropertyType {
    /// Every type, in discriminant order.
    pub const ALL: [FilePropertyType; 4] = [
        FilePropertyType::File,
        FilePropertyType::Directory,
        FilePropertyType::Files,
        FilePropertyType::Directories,
    ];

    /// Returns the stream discriminant.
    pub fn discriminant(self) -> u8 {
        self as u8
    }

    /// Returns the type with stream discriminant `value`.
    pub fn from_discriminant(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }
}

/// Whether a registered property holds a plain value or file locations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegisteredPropertyKind {
    /// A plain input value.
    Value,
    /// A file location of the given type.
    File(FilePropertyType),
}

/// A task input or output registered at configuration time.
#[derive(Clone, Debug)]
pub struct RegisteredProperty {
    /// The property name.
    pub name: String,
    /// Value or file.
    pub kind: RegisteredPropertyKind,
    /// An absent value is accepted.
    pub optional: bool,
    /// The property value.
    pub value: Value,
}

impl RegisteredProperty {
    /// A required plain value property.
    pub fn value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            kind: RegisteredPropertyKind::Value,
            optional: false,
            value: value.into(),
        }
    }

    /// A required file property.
    pub fn file(name: impl Into<String>, file_type: FilePropertyType, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            kind: RegisteredPropertyKind::File(file_type),
            optional: false,
            value: value.into(),
        }
    }

    /// Marks the property optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// A configured unit of build work.
#[derive(Debug)]
pub struct Task {
    /// The task implementation type.
    pub type_name: String,
    /// The owning project.
    pub project: Path,
    /// The task name, unique within the project.
    pub name: String,
    /// A build-wide unique id.
    pub unique_id: i64,
    /// The task's own declared fields, as a bean.
    pub state: Option<ObjectRef>,
    /// Registered inputs.
    pub inputs: Vec<RegisteredProperty>,
    /// Registered outputs.
    pub outputs: Vec<RegisteredProperty>,
    /// Files the task deletes.
    pub destroyables: Vec<Value>,
    /// Files the task uses as local state.
    pub local_state: Vec<Value>,
}

impl Task {
    /// Creates a task with no state or registered properties.
    pub fn new(type_name: impl Into<String>, project: Path, name: impl Into<String>, unique_id: i64) -> Self {
        Self {
            type_name: type_name.into(),
            project,
            name: name.into(),
            unique_id,
            state: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            destroyables: Vec::new(),
            local_state: Vec::new(),
        }
    }

    /// Sets the bean holding the task's declared fields.
    pub fn with_state(mut self, state: ObjectRef) -> Self {
        self.state = Some(state);
        self
    }

    /// Adds an input.
    pub fn with_input(mut self, property: RegisteredProperty) -> Self {
        self.inputs.push(property);
        self
    }

    /// Adds an output.
    pub fn with_output(mut self, property: RegisteredProperty) -> Self {
        self.outputs.push(property);
        self
    }

    /// Adds a destroyable file set.
    pub fn with_destroyable(mut self, files: impl Into<Value>) -> Self {
        self.destroyables.push(files.into());
        self
    }

    /// Adds a local state file set.
    pub fn with_local_state(mut self, files: impl Into<Value>) -> Self {
        self.local_state.push(files.into());
        self
    }

    /// Returns the task's full path.
    pub fn path(&self) -> Path {
        self.project.child(&self.name)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task '{}'", self.path())
    }
}
