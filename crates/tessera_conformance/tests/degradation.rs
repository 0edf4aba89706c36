//! Tests for graceful degradation: a value the cache cannot store is
//! replaced, reported exactly once, and the rest of the graph survives.

use tessera_cache::{encode_plan, CacheError, CacheOutcome};
use tessera_common::Path;
use tessera_conformance::{make_config, Harness};
use tessera_diagnostics::{DiagnosticCode, Severity};
use tessera_graph::{new_bean, BeanCell, BeanRegistry, ObjectRef, UnsupportedTypes, Value};
use tessera_plan::{NodeKind, ScheduledWork, WorkNode};

#[derive(Debug)]
struct Socket;

#[derive(Debug, Default)]
struct Upload {
    target: String,
    connection: Option<ObjectRef>,
    retries: i32,
}

tessera_graph::impl_bean!(Upload, "Upload" { target, connection, retries });

fn unsupported() -> UnsupportedTypes {
    UnsupportedTypes::standard().with::<Socket>("a network socket")
}

fn beans() -> BeanRegistry {
    let mut beans = BeanRegistry::new();
    beans.register::<Upload>();
    beans
}

fn harness() -> Harness {
    Harness::with_unsupported(beans(), unsupported())
}

fn strict_harness() -> Harness {
    Harness::with_config(beans(), unsupported(), &make_config(true, true))
}

#[test]
fn unsupported_value_decodes_as_null_with_one_warning() {
    let values = vec![Value::from("before"), Value::object(Socket), Value::from("after")];
    let (decoded, diagnostics) = harness().roundtrip(&values).unwrap();

    assert_eq!(decoded, vec![Value::from("before"), Value::Null, Value::from("after")]);
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, DiagnosticCode::UNSUPPORTED_TYPE);
    assert_eq!(diagnostics[0].severity, Severity::Warning);
}

#[test]
fn unsupported_element_is_replaced_inside_a_collection() {
    let list = Value::List(vec![Value::Int(1), Value::object(Socket), Value::Int(3)]);
    let (decoded, diagnostics) = harness().roundtrip(&[list]).unwrap();

    assert_eq!(decoded[0], Value::List(vec![Value::Int(1), Value::Null, Value::Int(3)]));
    assert_eq!(diagnostics.len(), 1);
}

#[test]
fn unsupported_field_keeps_its_default() {
    let upload = new_bean(Upload {
        target: "repo".to_string(),
        connection: Some(ObjectRef::new(Socket)),
        retries: 3,
    });
    let (decoded, diagnostics) = harness().roundtrip(&[Value::Object(upload)]).unwrap();

    let upload = decoded[0].downcast::<BeanCell<Upload>>().unwrap();
    let upload = upload.read();
    assert_eq!(upload.target, "repo");
    assert_eq!(upload.retries, 3);
    assert!(upload.connection.is_none());

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, DiagnosticCode::UNSUPPORTED_FIELD);
    let trace = diagnostics[0].trace.as_deref().unwrap_or_default();
    assert!(trace.contains("field 'connection'"), "trace was {trace:?}");
}

#[test]
fn unsupported_action_leaves_a_no_op_node() {
    let mut work = ScheduledWork::new();
    let mut node = WorkNode::new(NodeKind::Action(Value::object(Socket)), None);
    node.require();
    let id = work.add_node(node);
    work.schedule(id);

    let h = harness();
    let session = h.session();
    let bytes = encode_plan(h.codecs(), &session, &Path::root(), &work).unwrap();
    assert_eq!(session.diagnostics.len(), 1);
    assert_eq!(session.diagnostics.count_code(DiagnosticCode::UNSUPPORTED_TYPE), 1);

    let decoded = h.decode_work(bytes).unwrap();
    assert!(matches!(
        decoded.node(decoded.scheduled()[0]).unwrap().kind(),
        NodeKind::Action(Value::Null)
    ));
}

#[test]
fn strict_mode_reports_errors() {
    let (_, diagnostics) = strict_harness().roundtrip(&[Value::object(Socket)]).unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].severity, Severity::Error);
}

#[test]
fn strict_mode_refuses_to_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut work = ScheduledWork::new();
    let mut node = WorkNode::new(NodeKind::Action(Value::object(Socket)), None);
    node.require();
    let id = work.add_node(node);
    work.schedule(id);

    let h = strict_harness();
    let err = h.store_and_load(dir.path(), "k", &work).unwrap_err();
    assert!(matches!(err, CacheError::Problems { count: 1 }));

    let outcome = h
        .open_cache(dir.path())
        .load("k", h.codecs(), &h.session(), &Path::root());
    assert!(matches!(outcome, CacheOutcome::Miss(_)));
}
