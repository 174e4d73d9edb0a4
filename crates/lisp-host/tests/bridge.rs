//! End-to-end behavior of the bridge against the reference interpreter.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use lisp_bridge::{
    Bridge, BridgeConfig, BridgeEntry, BridgeError, Defun, Handle, HostId, Lookup, Opaque,
    ScriptFn, SymbolKind, Value, spawn_periodic_sweep,
};
use lisp_host::Interp;
use serde_json::json;
use tokio::task::LocalSet;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup_with(config: BridgeConfig) -> (Rc<Interp>, Bridge) {
    init_tracing();
    let interp = Interp::new();
    let bridge = Bridge::new(interp.clone(), config);
    (interp, bridge)
}

fn setup() -> (Rc<Interp>, Bridge) {
    setup_with(BridgeConfig::default())
}

fn sym(bridge: &Bridge, name: &str) -> Value {
    bridge.symbol(name).unwrap().into()
}

fn raise(message: &'static str) -> ScriptFn {
    ScriptFn::new(0, move |_, _| Err(BridgeError::raise(message)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_host_value_identity_round_trip() {
    let (_interp, bridge) = setup();
    let table = bridge.make_hash_table(&[]).unwrap();
    let back = bridge.call("identity", &[table.clone()]).unwrap();
    assert!(back.same(&table));

    let list = bridge.make_list(&[Value::Int(1)]).unwrap();
    assert!(!bridge.call("identity", &[list]).unwrap().same(&table));
}

#[test]
fn test_reverse_proxy_identity_through_host_state() {
    let (interp, bridge) = setup();
    let object = Opaque::new(String::from("script object"));
    let marker = bridge.wrap(Value::Opaque(object.clone())).unwrap();

    bridge.setq(&[sym(&bridge, "held"), marker.into()]).unwrap();
    let back = bridge.call("symbol-value", &[sym(&bridge, "held")]).unwrap();
    assert!(back.as_opaque().is_some_and(|o| o.ptr_eq(&object)));

    interp.eval_str(&bridge, "(bridge--clear-proxy 0 0)").unwrap();
    let err = bridge.call("symbol-value", &[sym(&bridge, "held")]).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidReverseProxy(_)));
}

#[test]
fn test_unwrapped_opaque_is_rejected() {
    let (_interp, bridge) = setup();
    let err = bridge
        .call("identity", &[Value::Opaque(Opaque::new(1u8))])
        .unwrap_err();
    assert!(matches!(err, BridgeError::Encoding(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Callbacks
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_arity_mismatch_leaves_no_state_behind() {
    let (interp, bridge) = setup();
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    bridge
        .defun(Defun::new(
            "two-args",
            ScriptFn::new(2, move |_, _| {
                flag.set(true);
                Ok(Value::Null)
            }),
        ))
        .unwrap();

    let err = bridge.call("two-args", &[Value::Int(1)]).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::ArityMismatch { callback: Some(_), expected: 2, actual: 1 }
    ));
    assert!(!ran.get());
    assert_eq!(bridge.stats().frame_depth, 0);

    let err = bridge
        .with_temp_buffer(ScriptFn::new(1, |_, _| Ok(Value::Null)))
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::ArityMismatch { callback: None, expected: 0, actual: 1 }
    ));
    assert_eq!(interp.current_buffer_name(), "*scratch*");

    bridge
        .call("two-args", &[Value::Int(1), Value::Int(2)])
        .unwrap();
    assert!(ran.get());
}

#[test]
fn test_exception_crosses_three_levels_unchanged() {
    let (interp, bridge) = setup();
    bridge
        .defun(Defun::new("inner-fn", raise("Intentional")))
        .unwrap();
    interp
        .eval_str(&bridge, "(defun middle () (inner-fn) (setq middle-finished t))")
        .unwrap();
    bridge
        .defun(Defun::new("outer", ScriptFn::new(0, |b, _| b.call("middle", &[]))))
        .unwrap();

    match bridge.call("outer", &[]).unwrap_err() {
        BridgeError::Exception(e) => assert_eq!(e.message(), "Intentional"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(interp.symbol_value("middle-finished").is_none());
    assert_eq!(bridge.stats().frame_depth, 0);

    // Nothing is left marking script code as running.
    assert!(bridge.evaluate_literal("1").is_ok());
}

#[test]
fn test_unwind_protect_cleanup_runs_before_exception_surfaces() {
    let (interp, bridge) = setup();
    bridge.defun(Defun::new("boom", raise("boom"))).unwrap();
    interp
        .eval_str(&bridge, "(defun guarded () (unwind-protect (boom) (setq cleaned t)))")
        .unwrap();

    let err = bridge.call("guarded", &[]).unwrap_err();
    assert!(matches!(err, BridgeError::Exception(ref e) if e.message() == "boom"));
    assert!(interp.symbol_value("cleaned").is_some());
}

#[test]
fn test_host_signal_surfaces_as_host_error() {
    let (_interp, bridge) = setup();
    match bridge.call("car", &[Value::Int(1)]).unwrap_err() {
        BridgeError::Host { symbol, .. } => assert_eq!(symbol, "wrong-type-argument"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_invalidated_callback_is_rejected() {
    let (interp, bridge) = setup();
    bridge
        .defun(Defun::new("once", ScriptFn::new(0, |_, _| Ok(Value::Null))))
        .unwrap();
    assert_eq!(bridge.stats().callbacks, 1);

    interp.eval_str(&bridge, "(bridge--clear 0 0)").unwrap();
    interp.eval_str(&bridge, "(bridge--clear 0 0)").unwrap();
    assert_eq!(bridge.stats().callbacks, 0);

    let err = bridge.call("once", &[]).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidCallback(_)));
}

#[test]
fn test_function_argument_becomes_host_closure() {
    let (_interp, bridge) = setup();
    let double = ScriptFn::new(1, |_, args| {
        Ok(Value::Int(args[0].as_i64().unwrap_or(0) * 2))
    });
    let result = bridge
        .call("funcall", &[double.into(), Value::Int(21)])
        .unwrap();
    assert_eq!(result.as_i64(), Some(42));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scopes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_with_current_buffer_restores_on_return() {
    let (interp, bridge) = setup();
    bridge.call("get-buffer-create", &["work".into()]).unwrap();

    let name = bridge
        .with_current_buffer(
            &"work".into(),
            ScriptFn::new(0, |b, _| {
                b.call("insert", &["hello".into()])?;
                b.call("buffer-name", &[])
            }),
        )
        .unwrap();
    assert_eq!(name.as_str(), Some("work"));
    assert_eq!(interp.current_buffer_name(), "*scratch*");
    assert_eq!(interp.get_buffer("work").unwrap().text.borrow().as_str(), "hello");
}

#[test]
fn test_scopes_restore_on_exception() {
    let (interp, bridge) = setup();
    bridge.call("get-buffer-create", &["work".into()]).unwrap();

    let err = bridge
        .with_current_buffer(&"work".into(), raise("inside"))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Exception(_)));
    assert_eq!(interp.current_buffer_name(), "*scratch*");

    let err = bridge.with_temp_buffer(raise("inside temp")).unwrap_err();
    assert!(matches!(err, BridgeError::Exception(_)));
    assert_eq!(interp.current_buffer_name(), "*scratch*");
    assert!(interp.get_buffer(" *temp*").is_none());
}

#[test]
fn test_with_current_buffer_accepts_quoted_name() {
    let (interp, bridge) = setup();
    bridge.call("get-buffer-create", &["work".into()]).unwrap();

    let quoted = bridge.quote(&"work".into()).unwrap();
    let name = bridge
        .with_current_buffer(&quoted, ScriptFn::new(0, |b, _| b.call("buffer-name", &[])))
        .unwrap();
    assert_eq!(name.as_str(), Some("work"));
    assert_eq!(interp.current_buffer_name(), "*scratch*");

    let buffer = bridge.call("get-buffer", &["work".into()]).unwrap();
    let name = bridge
        .with_current_buffer(&buffer, ScriptFn::new(0, |b, _| b.call("buffer-name", &[])))
        .unwrap();
    assert_eq!(name.as_str(), Some("work"));
}

#[test]
fn test_nested_scopes() {
    let (interp, bridge) = setup();
    bridge.call("get-buffer-create", &["work".into()]).unwrap();

    let outer = bridge
        .with_current_buffer(
            &"work".into(),
            ScriptFn::new(0, |b, _| {
                let inner =
                    b.with_temp_buffer(ScriptFn::new(0, |b, _| b.call("buffer-name", &[])))?;
                let after = b.call("buffer-name", &[])?;
                Ok(Value::Array(vec![inner, after]))
            }),
        )
        .unwrap();

    let outer = outer.as_handle().unwrap();
    assert_eq!(
        bridge.structural_form(outer).unwrap(),
        json!([" *temp*", "work"])
    );
    assert_eq!(interp.current_buffer_name(), "*scratch*");
    assert!(interp.get_buffer(" *temp*").is_none());
}

#[test]
fn test_let_bind() {
    let (interp, bridge) = setup();

    let seen = bridge
        .let_bind(
            &[("lb-x", Value::Int(5))],
            ScriptFn::new(0, |b, _| {
                let symbol = b.symbol("lb-x")?;
                b.call("symbol-value", &[symbol.into()])
            }),
        )
        .unwrap();
    assert_eq!(seen.as_i64(), Some(5));
    assert!(interp.symbol_value("lb-x").is_none());

    let passed = bridge
        .let_bind(
            &[("lb-a", Value::Int(1)), ("lb-b", "two".into())],
            ScriptFn::new(2, |_, args| Ok(Value::Array(args.to_vec()))),
        )
        .unwrap();
    assert_eq!(
        bridge.structural_form(passed.as_handle().unwrap()).unwrap(),
        json!([1, "two"])
    );

    let err = bridge
        .let_bind(
            &[("lb-a", Value::Int(1))],
            ScriptFn::new(3, |_, _| Ok(Value::Null)),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::ArityMismatch { expected: 1, actual: 3, .. }
    ));
}

#[test]
fn test_let_bind_keeps_quoted_values() {
    let (_interp, bridge) = setup();
    let foo = sym(&bridge, "foo");
    let quoted = bridge.quote(&foo).unwrap();

    let bound = bridge
        .let_bind(
            &[("lb-q", quoted.clone())],
            ScriptFn::new(1, |_, args| Ok(args[0].clone())),
        )
        .unwrap();
    assert!(bound.same(&foo));

    let px = sym(&bridge, "lb-px");
    bridge.setq(&[px.clone(), quoted]).unwrap();
    assert!(bridge.call("symbol-value", &[px]).unwrap().same(&foo));

    let list = bridge.make_list(&[Value::Int(1), Value::Int(2)]).unwrap();
    let bound = bridge
        .let_bind(
            &[("lb-l", list.clone())],
            ScriptFn::new(1, |_, args| Ok(args[0].clone())),
        )
        .unwrap();
    assert!(bound.same(&list));
}

// ─────────────────────────────────────────────────────────────────────────────
// Symbols
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_intern_cache_and_unintern() {
    let (_interp, bridge) = setup();
    let a = bridge.symbol("cache-probe").unwrap();
    let b = bridge.symbol("cache_probe").unwrap();
    assert_eq!(a, b);

    bridge.call("unintern", &["cache-probe".into()]).unwrap();
    assert_eq!(bridge.symbol("cache-probe").unwrap(), a);

    let fresh = bridge
        .lookup("cache-probe", SymbolKind::Symbol, Lookup::Uncached)
        .unwrap();
    assert_ne!(fresh, a);
    assert_eq!(bridge.symbol("cache-probe").unwrap(), fresh);
}

#[test]
fn test_keyword_lookup() {
    let (_interp, bridge) = setup();
    let test = bridge.keyword("test").unwrap();
    assert_eq!(bridge.keyword(":test").unwrap(), test);
    assert_eq!(bridge.structural_form(&test).unwrap(), json!(":test"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Liveness
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_sweep_releases_in_one_batch() {
    let (interp, bridge) = setup();
    let ids: Vec<HostId> = (0..3)
        .map(|i| bridge.materialize(&json!([i])).unwrap().id())
        .collect();
    assert!(ids.iter().all(|id| interp.is_retained(*id)));

    assert_eq!(bridge.sweep(), 3);
    assert_eq!(interp.release_batches(), vec![ids.clone()]);
    assert!(ids.iter().all(|id| !interp.is_retained(*id)));
    assert_eq!(bridge.stats().released_total, 3);

    assert_eq!(bridge.sweep(), 0);
    assert_eq!(interp.release_batches().len(), 1);
}

#[test]
fn test_garbage_collect_inside_callback_releases_stale_values() {
    let (interp, bridge) = setup();
    let stale = bridge.materialize(&json!("stale")).unwrap().id();

    let seen = Rc::new(Cell::new(None));
    let record = seen.clone();
    let probe = interp.clone();
    bridge
        .defun(Defun::new(
            "probe",
            ScriptFn::new(1, move |b, args| {
                let id = args[0].as_handle().map(Handle::id);
                b.call("garbage-collect", &[])?;
                record.set(id.map(|id| probe.is_retained(id)));
                Ok(Value::Null)
            }),
        ))
        .unwrap();

    interp.eval_str(&bridge, "(probe (list 1 2))").unwrap();
    assert_eq!(seen.get(), Some(true));
    assert!(!interp.is_retained(stale));
}

#[tokio::test]
async fn test_periodic_sweep_releases_host_values() {
    let config = BridgeConfig::default().with_sweep_interval(Duration::from_millis(10));
    let (interp, bridge) = setup_with(config);
    let bridge = Rc::new(bridge);

    LocalSet::new()
        .run_until(async move {
            let task = spawn_periodic_sweep(&bridge).unwrap();

            let dropped = bridge.materialize(&json!({"a": 1})).unwrap().id();
            assert!(interp.is_retained(dropped));
            tokio::time::sleep(Duration::from_millis(60)).await;
            assert!(!interp.is_retained(dropped));

            drop(bridge);
            task.await.unwrap();
        })
        .await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Privilege
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_forbidden_operations() {
    let (interp, bridge) = setup();
    let err = bridge.call("eval_js", &["1".into()]).unwrap_err();
    assert!(matches!(err, BridgeError::ForbiddenOperation(ref op) if op == "eval-js"));
    let err = bridge.call("recursive_edit", &[]).unwrap_err();
    assert!(matches!(err, BridgeError::ForbiddenOperation(ref op) if op == "recursive-edit"));
    let symbol = bridge.symbol("recursive-edit").unwrap();
    let err = bridge.funcall(&symbol, &[]).unwrap_err();
    assert!(matches!(err, BridgeError::ForbiddenOperation(ref op) if op == "recursive-edit"));

    // Reached indirectly through host evaluation while script code is running.
    let form = bridge
        .list(&[sym(&bridge, "eval-js"), "[1,2]".into()])
        .unwrap();
    let err = bridge.eval(&form).unwrap_err();
    assert!(matches!(err, BridgeError::ForbiddenOperation(_)));

    // The host itself may evaluate script source at top level.
    let result = interp.eval_str(&bridge, "(eval-js \"[1,2]\")").unwrap();
    assert_eq!(result.print(), "[1 2]");
}

#[test]
fn test_nested_literal_eval_when_allowed() {
    let (_interp, bridge) = setup_with(BridgeConfig::default().allow_nested_literal_eval(true));
    let form = bridge
        .list(&[sym(&bridge, "eval-js"), "{\"a\": [1, 2]}".into()])
        .unwrap();
    let result = bridge.eval(&form).unwrap();
    assert_eq!(
        bridge.structural_form(result.as_handle().unwrap()).unwrap(),
        json!([":a", [1, 2]])
    );
}

#[test]
fn test_forbidden_list_from_toml() {
    let config = BridgeConfig::from_toml_str(
        r#"
        [privilege]
        forbidden_operations = ["kill-buffer"]
        "#,
    )
    .unwrap();
    let (interp, bridge) = setup_with(config);

    let err = bridge.call("kill_buffer", &[]).unwrap_err();
    assert!(matches!(err, BridgeError::ForbiddenOperation(_)));
    assert_eq!(interp.current_buffer_name(), "*scratch*");

    // No longer forbidden by name, but still refused while script code runs.
    let err = bridge.call("eval-js", &["1".into()]).unwrap_err();
    assert!(matches!(err, BridgeError::ForbiddenOperation(ref op) if op != "eval-js"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_nul_in_string_is_an_encoding_error() {
    let (_interp, bridge) = setup();
    let err = bridge.call("identity", &["a\0b".into()]).unwrap_err();
    assert!(matches!(err, BridgeError::Encoding(_)));
}

#[test]
fn test_structural_forms() {
    let (interp, bridge) = setup();
    interp
        .eval_str(&bridge, "(defun native-probe (x) x)")
        .unwrap();
    let function = bridge
        .call("symbol-function", &[sym(&bridge, "native-probe")])
        .unwrap();
    assert_eq!(
        bridge.structural_form(function.as_handle().unwrap()).unwrap(),
        json!({"nativeProxy": true})
    );

    let data = bridge.materialize(&json!({"k": [1, "two"]})).unwrap();
    assert_eq!(
        bridge.structural_form(&data).unwrap(),
        json!([":k", [1, "two"]])
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Definitions and special forms
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_defun_with_doc_and_interactive() {
    let (_interp, bridge) = setup();
    let name = bridge
        .defun(
            Defun::new("greet", ScriptFn::new(0, |_, _| Ok("hi".into())))
                .with_doc("Say hi.")
                .interactive(),
        )
        .unwrap();
    assert_eq!(name, bridge.symbol("greet").unwrap());

    let documentation = bridge.call("documentation", &[sym(&bridge, "greet")]).unwrap();
    assert_eq!(documentation.as_str(), Some("Say hi."));
    let command = bridge.call("commandp", &[sym(&bridge, "greet")]).unwrap();
    assert_eq!(command.as_bool(), Some(true));
    assert_eq!(bridge.call("greet", &[]).unwrap().as_str(), Some("hi"));
}

#[test]
fn test_setq_and_defvar() {
    let (_interp, bridge) = setup();
    let list = bridge.make_list(&[Value::Int(1), Value::Int(2)]).unwrap();
    bridge.setq(&[sym(&bridge, "my-list"), list.clone()]).unwrap();
    let back = bridge.call("symbol-value", &[sym(&bridge, "my-list")]).unwrap();
    assert!(back.same(&list));

    let fields = BTreeMap::from([("a".to_string(), Value::Int(1))]);
    bridge
        .setq(&[sym(&bridge, "my-plist"), Value::Object(fields)])
        .unwrap();
    let plist = bridge.call("symbol-value", &[sym(&bridge, "my-plist")]).unwrap();
    let a = bridge
        .call("plist-get", &[plist, bridge.keyword("a").unwrap().into()])
        .unwrap();
    assert_eq!(a.as_i64(), Some(1));

    bridge.defvar(&[sym(&bridge, "my-var"), Value::Int(3)]).unwrap();
    bridge.defvar(&[sym(&bridge, "my-var"), Value::Int(4)]).unwrap();
    let value = bridge.call("symbol-value", &[sym(&bridge, "my-var")]).unwrap();
    assert_eq!(value.as_i64(), Some(3));
}

#[test]
fn test_define_key_with_quoted_command() {
    let (_interp, bridge) = setup();
    let map = bridge.call("make-sparse-keymap", &[]).unwrap();
    let command = bridge.quote(&sym(&bridge, "ignore")).unwrap();
    bridge
        .define_key(&[map.clone(), "C-c a".into(), command])
        .unwrap();

    let bound = bridge.call("lookup-key", &[map, "C-c a".into()]).unwrap();
    assert!(bound.same(&sym(&bridge, "ignore")));
}

#[test]
fn test_define_minor_and_derived_mode() {
    let (_interp, bridge) = setup();
    bridge
        .define_minor_mode(&[sym(&bridge, "demo-mode"), "Toggle demo.".into()])
        .unwrap();
    assert_eq!(bridge.call("demo-mode", &[]).unwrap().as_bool(), Some(true));
    let state = bridge.call("symbol-value", &[sym(&bridge, "demo-mode")]).unwrap();
    assert_eq!(state.as_bool(), Some(true));
    let command = bridge.call("commandp", &[sym(&bridge, "demo-mode")]).unwrap();
    assert_eq!(command.as_bool(), Some(true));

    bridge
        .define_derived_mode(&[sym(&bridge, "demo-text-mode"), Value::Null, "Demo".into()])
        .unwrap();
    bridge.call("demo-text-mode", &[]).unwrap();
    let mode_name = bridge.call("symbol-value", &[sym(&bridge, "mode-name")]).unwrap();
    assert_eq!(mode_name.as_str(), Some("Demo"));
}

#[test]
fn test_constructors() {
    let (_interp, bridge) = setup();

    let table = bridge
        .make_hash_table(&[("a".into(), Value::Int(1))])
        .unwrap();
    let a = bridge.call("gethash", &["a".into(), table.clone()]).unwrap();
    assert_eq!(a.as_i64(), Some(1));
    assert_eq!(
        bridge.structural_form(table.as_handle().unwrap()).unwrap(),
        json!({"a": 1})
    );

    let alist = bridge.make_alist(&[("k".into(), "v".into())]).unwrap();
    let cell = bridge.call("car", &[alist]).unwrap();
    assert_eq!(bridge.call("cdr", &[cell]).unwrap().as_str(), Some("v"));

    let plist = bridge.make_plist(&[("size", Value::Int(2))]).unwrap();
    let size = bridge
        .call("plist-get", &[plist, bridge.keyword("size").unwrap().into()])
        .unwrap();
    assert_eq!(size.as_i64(), Some(2));

    let vector = bridge.make_vector(&[Value::Int(1), "x".into()]).unwrap();
    assert_eq!(
        bridge.structural_form(vector.as_handle().unwrap()).unwrap(),
        json!([1, "x"])
    );

    assert!(bridge.make_list(&[]).unwrap().is_null());

    let text = bridge.make_string("hi").unwrap();
    let joined = bridge.call("concat", &[text.into(), "!".into()]).unwrap();
    assert_eq!(joined.as_str(), Some("hi!"));
}
