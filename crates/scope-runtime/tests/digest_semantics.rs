//! End-to-end digest behavior: change detection, ordering, convergence,
//! and deferred work.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use scope_runtime::{
    CollectingSink, Deregistration, Equality, ErrorKind, Expression, List, Map, Phase, Scope,
    ScopeError, TurnQueue, Value, try_expr, try_listener,
};

fn setup() -> (Scope, TurnQueue, CollectingSink) {
    let queue = TurnQueue::new();
    let sink = CollectingSink::new();
    let scope = Scope::builder(queue.clone()).sink(sink.clone()).build();
    (scope, queue, sink)
}

fn counter() -> (Rc<Cell<u32>>, impl Fn(&Value, &Value, &Scope) + 'static) {
    let calls = Rc::new(Cell::new(0));
    let count = Rc::clone(&calls);
    (calls, move |_: &Value, _: &Value, _: &Scope| count.set(count.get() + 1))
}

fn bump(scope: &Scope, name: &str) {
    scope.update(name, |v| Value::from(v.as_number().unwrap_or(0.0) + 1.0));
}

// ---------------------------------------------------------------------------
// Change detection
// ---------------------------------------------------------------------------

#[test]
fn unchanged_reference_does_not_refire() {
    let (scope, _, _) = setup();
    let list = List::from_vec(vec![Value::from(1)]);
    scope.set("list", list.clone());
    let (calls, listener) = counter();
    scope.watch(|s| s.get("list"), listener);

    scope.digest().unwrap();
    assert_eq!(calls.get(), 1);

    // In-place mutation keeps the identity: reference mode stays quiet.
    list.push(2);
    scope.digest().unwrap();
    assert_eq!(calls.get(), 1);

    // A new container with equal contents is a different reference.
    scope.set("list", Value::list([1, 2]));
    scope.digest().unwrap();
    assert_eq!(calls.get(), 2);
}

#[test]
fn nan_is_stable_in_both_modes() {
    let (scope, _, _) = setup();
    let (shallow, on_shallow) = counter();
    let (deep, on_deep) = counter();
    scope.watch(|_| Value::nan(), on_shallow);
    scope.watch_deep(|_| Value::list([Value::nan()]), on_deep);

    for _ in 0..3 {
        scope.digest().unwrap();
    }
    assert_eq!(shallow.get(), 1);
    assert_eq!(deep.get(), 1);
}

#[test]
fn deep_watch_detects_in_place_mutation_without_aliasing() {
    let (scope, _, _) = setup();
    let map = Map::from_entries([("a", 1)]);
    scope.set("obj", map.clone());
    let olds = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&olds);
    scope.watch_deep(
        |s| s.get("obj"),
        move |_, old, _| log.borrow_mut().push(old.as_map().and_then(|m| m.get("a"))),
    );

    scope.digest().unwrap();
    scope.digest().unwrap();
    assert_eq!(olds.borrow().len(), 1);

    map.insert("a", 2);
    scope.digest().unwrap();
    assert_eq!(olds.borrow().len(), 2);
    // The old value is the snapshot, not the live map.
    let old_a = olds.borrow()[1].clone();
    assert_eq!(old_a.and_then(|v| v.as_number()), Some(1.0));

    // Re-inserting the same contents is not a change.
    map.insert("a", 2);
    scope.digest().unwrap();
    assert_eq!(olds.borrow().len(), 2);
}

#[test]
fn first_call_never_sees_a_sentinel() {
    let (scope, _, _) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));
    for value in [Value::Undefined, Value::Null, Value::nan(), Value::from("x")] {
        let log = Rc::clone(&seen);
        let observed = value.clone();
        scope.watch(
            move |_| observed.clone(),
            move |new, old, _| log.borrow_mut().push(Equality::Reference.equals(new, old)),
        );
    }
    scope.digest().unwrap();
    assert_eq!(*seen.borrow(), vec![true; 4]);
}

// ---------------------------------------------------------------------------
// Ordering and registry mutation
// ---------------------------------------------------------------------------

#[test]
fn self_deregistering_watcher_visitation_order() {
    let (scope, _, _) = setup();
    let visits = Rc::new(RefCell::new(Vec::new()));

    let log = Rc::clone(&visits);
    scope.watch(
        move |_| {
            log.borrow_mut().push("first");
            Value::Null
        },
        |_, _, _| {},
    );

    let log = Rc::clone(&visits);
    let handle: Rc<RefCell<Option<Deregistration>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&handle);
    let second = scope.watch(
        move |_| {
            log.borrow_mut().push("second");
            Value::Null
        },
        move |_, _, _| {
            if let Some(handle) = slot.borrow().as_ref() {
                handle.deregister();
            }
        },
    );
    *handle.borrow_mut() = Some(second);

    let log = Rc::clone(&visits);
    scope.watch(
        move |_| {
            log.borrow_mut().push("third");
            Value::Null
        },
        |_, _, _| {},
    );

    scope.digest().unwrap();
    assert_eq!(
        *visits.borrow(),
        vec!["first", "second", "third", "first", "third"]
    );
}

#[test]
fn watcher_added_by_listener_runs_in_same_sweep() {
    let (scope, _, _) = setup();
    let (calls, listener) = counter();
    let listener = Rc::new(listener);
    let added = Rc::new(Cell::new(false));
    let flag = Rc::clone(&added);
    scope.watch(
        |_| Value::Null,
        move |_, _, s| {
            if !flag.replace(true) {
                let listener = Rc::clone(&listener);
                s.watch(|_| Value::from(1), move |n, o, s| listener(n, o, s));
            }
        },
    );
    scope.digest().unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(scope.watcher_count(), 2);
}

#[test]
fn deregistered_listener_stops_firing() {
    let (scope, _, _) = setup();
    scope.set("n", 0);
    let (calls, listener) = counter();
    let handle = scope.watch(|s| s.get("n"), listener);

    for _ in 0..3 {
        bump(&scope, "n");
        scope.digest().unwrap();
    }
    assert_eq!(calls.get(), 3);

    handle.deregister();
    handle.deregister();
    assert!(!handle.is_active());
    for _ in 0..3 {
        bump(&scope, "n");
        scope.digest().unwrap();
    }
    assert_eq!(calls.get(), 3);
    assert_eq!(scope.watcher_count(), 0);
}

// ---------------------------------------------------------------------------
// Convergence
// ---------------------------------------------------------------------------

#[test]
fn fixed_point_system_converges() {
    let (scope, _, _) = setup();
    scope.set("a", 1);
    scope.watch(|s| s.get("a"), |new, _, s| s.set("b", new.clone()));
    scope.watch(|s| s.get("b"), |new, _, s| s.set("c", new.clone()));
    scope.digest().unwrap();
    assert_eq!(scope.get("c").as_number(), Some(1.0));
    assert_eq!(scope.digest_count(), 1);
}

#[test]
fn mutually_dirtying_watchers_fail_to_converge() {
    let (scope, _, _) = setup();
    scope.set("a", 0);
    scope.set("b", 0);
    scope.watch(|s| s.get("a"), |_, _, s| bump(s, "b"));
    scope.watch(|s| s.get("b"), |_, _, s| bump(s, "a"));

    let err = scope.digest().unwrap_err();
    match err {
        ScopeError::NonConvergence { ttl, ref last_fired } => {
            assert_eq!(ttl, 10);
            assert!(!last_fired.is_empty());
        }
        other => panic!("expected non-convergence, got {other}"),
    }
    assert_eq!(scope.phase(), None);
    assert_eq!(scope.digest_count(), 0);
}

#[test]
fn perpetual_eval_async_fails_to_converge() {
    let (scope, _, _) = setup();
    scope.watch(
        |s| {
            s.eval_async(|_: &Scope| Value::Undefined);
            Value::Null
        },
        |_, _, _| {},
    );
    let err = scope.digest().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NonConvergence);
}

#[test]
fn phase_conflict_changes_nothing() {
    let (scope, _, _) = setup();
    let outcome = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&outcome);
    scope.watch(
        |_| Value::Null,
        move |_, _, s| {
            let err = s.apply(|s: &Scope| {
                s.set("touched", true);
                Value::Null
            });
            *slot.borrow_mut() = Some((err.map_err(|e| e.to_string()), s.phase()));
        },
    );
    scope.digest().unwrap();
    let (result, phase) = outcome.borrow_mut().take().unwrap();
    assert_eq!(
        result,
        Err("cannot start apply: digest already in progress".to_string())
    );
    assert_eq!(phase, Some(Phase::Digest));
    assert!(!scope.contains("touched"));
}

// ---------------------------------------------------------------------------
// Deferred work
// ---------------------------------------------------------------------------

#[test]
fn eval_async_inside_watch_is_drained_same_digest() {
    let (scope, queue, _) = setup();
    scope.watch(
        |s| {
            if !s.contains("seeded") {
                s.eval_async(|s: &Scope| {
                    s.set("seeded", "yes");
                    Value::Undefined
                });
            }
            Value::Null
        },
        |_, _, _| {},
    );
    let (calls, listener) = counter();
    scope.watch(|s| s.get("seeded"), listener);

    scope.digest().unwrap();
    assert_eq!(scope.get("seeded").as_str(), Some("yes"));
    assert_eq!(calls.get(), 2);
    assert!(queue.is_idle(), "no extra digest scheduled from inside a phase");
}

#[test]
fn eval_async_outside_phase_schedules_exactly_one_digest() {
    let (scope, queue, _) = setup();
    let (calls, listener) = counter();
    scope.watch(|s| s.get("x"), listener);

    scope.eval_async(|s: &Scope| {
        s.set("x", 1);
        Value::Undefined
    });
    assert_eq!(scope.digest_count(), 0);
    queue.run_until_idle(8);
    assert_eq!(scope.digest_count(), 1);
    assert_eq!(calls.get(), 1);
}

#[test]
fn apply_digests_once_even_when_expression_fails() {
    let (scope, _, _) = setup();
    let (calls, listener) = counter();
    scope.watch(|s| s.get("x"), listener);

    let err = scope
        .apply(try_expr(|s, _| {
            s.set("x", 1);
            Err("apply failed".into())
        }))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Expression);
    assert_eq!(scope.digest_count(), 1);
    assert_eq!(calls.get(), 1);
    assert_eq!(scope.phase(), None);
}

#[test]
fn apply_async_coalesces_into_one_ordered_digest() {
    let (scope, queue, _) = setup();
    let order = Rc::new(RefCell::new(Vec::new()));
    for name in ["one", "two"] {
        let log = Rc::clone(&order);
        scope.apply_async(move |_: &Scope| {
            log.borrow_mut().push(name);
            Value::Undefined
        });
    }
    assert_eq!(queue.pending(), 1);
    queue.run_until_idle(8);
    assert_eq!(*order.borrow(), vec!["one", "two"]);
    assert_eq!(scope.digest_count(), 1);
}

#[test]
fn digest_flushes_pending_apply_async() {
    let (scope, queue, _) = setup();
    scope.apply_async(|s: &Scope| {
        s.set("flushed", true);
        Value::Undefined
    });
    scope.digest().unwrap();
    assert_eq!(scope.get("flushed").as_bool(), Some(true));
    queue.run_until_idle(8);
    assert_eq!(scope.digest_count(), 1);
}

// ---------------------------------------------------------------------------
// Groups, collections, lifecycle
// ---------------------------------------------------------------------------

#[test]
fn watch_group_coalesces_member_changes() {
    let (scope, _, _) = setup();
    scope.set("a", 1);
    scope.set("b", 2);
    let calls = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&calls);
    let members: Vec<Box<dyn Expression>> = vec![
        Box::new(|s: &Scope| s.get("a")),
        Box::new(|s: &Scope| s.get("b")),
    ];
    scope.watch_group(
        members,
        move |new, old, _| {
            let nums = |vals: &[Value]| vals.iter().filter_map(Value::as_number).collect::<Vec<_>>();
            log.borrow_mut().push((nums(new), nums(old)));
        },
    );

    scope.digest().unwrap();
    scope.set("a", 10);
    scope.set("b", 20);
    scope.digest().unwrap();

    assert_eq!(
        *calls.borrow(),
        vec![
            (vec![1.0, 2.0], vec![1.0, 2.0]),
            (vec![10.0, 20.0], vec![1.0, 2.0]),
        ]
    );
}

#[test]
fn empty_watch_group_fires_once_unless_deregistered() {
    let (scope, queue, _) = setup();
    let (calls, listener) = counter();
    let listener = Rc::new(listener);
    let l = Rc::clone(&listener);
    scope.watch_group(Vec::new(), move |_, _, s| l(&Value::Null, &Value::Null, s));
    queue.run_until_idle(8);
    assert_eq!(calls.get(), 1);

    let l = Rc::clone(&listener);
    let handle = scope.watch_group(Vec::new(), move |_, _, s| l(&Value::Null, &Value::Null, s));
    handle.deregister();
    queue.run_until_idle(8);
    assert_eq!(calls.get(), 1);
}

#[test]
fn watch_collection_tracks_shallow_contents() {
    let (scope, _, _) = setup();
    let items = List::from_vec(vec![Value::from("a")]);
    scope.set("items", items.clone());
    let (calls, listener) = counter();
    scope.watch_collection(|s| s.get("items"), listener);

    scope.digest().unwrap();
    items.push("b");
    scope.digest().unwrap();
    scope.set("items", Value::list(["a", "b"]));
    scope.digest().unwrap();
    assert_eq!(calls.get(), 2, "identity change with equal items is ignored");
}

#[test]
fn listener_faults_go_to_sink() {
    let (scope, _, sink) = setup();
    scope.watch_with(
        |_: &Scope| Value::Null,
        try_listener(|_, _, _| Err("listener fault".into())),
        Equality::Reference,
    );
    scope.digest().unwrap();
    assert_eq!(sink.kinds(), vec![ErrorKind::WatchFault]);
    assert!(sink.messages()[0].contains("listener fault"));
}

#[test]
fn destroyed_scope_ignores_deferred_work() {
    let (scope, queue, _) = setup();
    scope.eval_async(|s: &Scope| {
        s.set("ran", true);
        Value::Undefined
    });
    scope.destroy();
    scope.apply_async(|s: &Scope| {
        s.set("ran", true);
        Value::Undefined
    });
    queue.run_until_idle(8);
    assert!(!scope.contains("ran"));
    assert!(scope.is_destroyed());
}

#[test]
fn post_digest_callback_queued_during_drain_runs_same_drain() {
    let (scope, _, _) = setup();
    let order = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&order);
    scope.post_digest(move |s| {
        log.borrow_mut().push(1);
        let log = Rc::clone(&log);
        s.post_digest(move |_| log.borrow_mut().push(2));
    });

    scope.digest().unwrap();
    assert_eq!(*order.borrow(), vec![1, 2]);

    scope.digest().unwrap();
    assert_eq!(order.borrow().len(), 2);
}

#[test]
fn deregistered_watch_group_removes_every_member() {
    let (scope, _, _) = setup();
    scope.set("a", 1);
    scope.set("b", 2);
    let (calls, listener) = counter();
    let members: Vec<Box<dyn Expression>> = vec![
        Box::new(|s: &Scope| s.get("a")),
        Box::new(|s: &Scope| s.get("b")),
    ];
    let handle = scope.watch_group(members, move |_, _, s| listener(&Value::Null, &Value::Null, s));
    assert_eq!(scope.watcher_count(), 2);
    assert_eq!(handle.ids().len(), 2);

    scope.digest().unwrap();
    assert_eq!(calls.get(), 1);

    handle.deregister();
    assert_eq!(scope.watcher_count(), 0);
    scope.set("a", 10);
    scope.digest().unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn destroyed_scope_skips_apply_and_post_digest() {
    let (scope, _, _) = setup();
    scope.destroy();

    let evaluated = Rc::new(Cell::new(false));
    let flag = Rc::clone(&evaluated);
    let result = scope.apply(move |_: &Scope| {
        flag.set(true);
        Value::from(1)
    });
    assert!(matches!(result, Ok(Value::Undefined)));
    assert!(!evaluated.get());

    let ran = Rc::new(Cell::new(false));
    let flag = Rc::clone(&ran);
    scope.post_digest(move |_| flag.set(true));
    scope.digest().unwrap();
    assert!(!ran.get());
    assert_eq!(scope.digest_count(), 0);
}
