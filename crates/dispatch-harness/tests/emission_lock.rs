//! Emission lock coalescing, nesting and multi-context behaviour.

use std::panic::{AssertUnwindSafe, catch_unwind};

use dispatch_core::{
    ContextId, Declaration, Declare, Dispatcher, Emission, Flow, Property, Value,
};
use dispatch_harness::{Recorder, Sender};
use pretty_assertions::assert_eq;

struct Model;

impl Declare for Model {
    fn declare(decl: &mut Declaration) {
        decl.property("value", Property::int())
            .property("items", Property::list());
    }
}

#[test]
fn burst_collapses_to_last_emission() {
    let sender = Sender::new().unwrap();
    let d = sender.dispatcher();
    let rec = Recorder::new();
    d.bind("on_test_a", rec.event_callback()).unwrap();

    {
        let _lock = d.emission_lock("on_test_a").unwrap();
        for i in 0..10 {
            sender
                .trigger_event("on_test_a", Emission::with_args([i]).with_kwarg("emit_count", i))
                .unwrap();
        }
        assert_eq!(rec.count(), 0);
    }

    assert_eq!(rec.count(), 1);
    let last = rec.last().unwrap();
    assert_eq!(last.arg(0), Some(&Value::Int(9)));
    assert_eq!(last.kwarg("emit_count"), Some(&Value::Int(9)));
}

#[test]
fn nested_locks_replay_once_on_outer_release() {
    let sender = Sender::new().unwrap();
    let d = sender.dispatcher();
    let rec = Recorder::new();
    d.bind("on_test_a", rec.event_callback()).unwrap();

    let outer = d.emission_lock("on_test_a").unwrap();
    {
        let _inner = d.emission_lock("on_test_a").unwrap();
        sender.trigger_event("on_test_a", Emission::with_args([1])).unwrap();
    }
    assert_eq!(rec.count(), 0);
    sender.trigger_event("on_test_a", Emission::with_args([2])).unwrap();
    assert_eq!(outer.release().unwrap(), Flow::Continue);
    assert_eq!(rec.count(), 1);
    assert_eq!(rec.last().unwrap().arg(0), Some(&Value::Int(2)));
}

#[test]
fn release_without_emissions_dispatches_nothing() {
    let sender = Sender::new().unwrap();
    let d = sender.dispatcher();
    let rec = Recorder::new();
    d.bind("on_test_a", rec.event_callback()).unwrap();
    drop(d.emission_lock("on_test_a").unwrap());
    assert_eq!(rec.count(), 0);
}

#[test]
fn locks_are_per_channel() {
    let sender = Sender::new().unwrap();
    let d = sender.dispatcher();
    let rec = Recorder::new();
    d.bind("on_test_a", rec.event_callback()).unwrap();
    d.bind("on_test_b", rec.event_callback()).unwrap();
    let _lock = d.emission_lock("on_test_a").unwrap();
    sender.trigger_event("on_test_b", Emission::new()).unwrap();
    assert_eq!(rec.count(), 1);
}

#[test]
fn property_changes_coalesce() {
    let d = Dispatcher::new::<Model>().unwrap();
    let rec = Recorder::new();
    d.bind("value", rec.prop_callback()).unwrap();
    {
        let _lock = d.emission_lock("value").unwrap();
        for i in 1..=5 {
            d.set("value", i).unwrap();
        }
        // Stored immediately, only the dispatch is deferred.
        assert_eq!(d.get("value").unwrap(), Value::Int(5));
    }
    assert_eq!(rec.count(), 1);
    let last = rec.last().unwrap();
    assert_eq!(last.arg(0), Some(&Value::Int(5)));
    assert_eq!(last.kwarg("old"), Some(&Value::Int(4)));
}

#[test]
fn container_mutations_coalesce() {
    let d = Dispatcher::new::<Model>().unwrap();
    let rec = Recorder::new();
    d.bind("items", rec.prop_callback()).unwrap();
    let items = d.get("items").unwrap();
    {
        let _lock = d.emission_lock("items").unwrap();
        for i in 0..20 {
            items.as_list().unwrap().push(i).unwrap();
        }
    }
    assert_eq!(rec.count(), 1);
    assert_eq!(items.as_list().unwrap().len(), 20);
}

#[test]
fn any_context_holding_the_lock_defers_dispatch() {
    let sender = Sender::new().unwrap();
    let d = sender.dispatcher();
    let rec = Recorder::new();
    d.bind("on_test_a", rec.event_callback()).unwrap();

    let a = ContextId::next();
    let b = ContextId::next();
    let lock_a = d.emission_lock_in("on_test_a", a).unwrap();
    let lock_b = d.emission_lock_in("on_test_a", b).unwrap();
    sender.trigger_event("on_test_a", Emission::with_args(["from a"])).unwrap();
    sender.trigger_event("on_test_a", Emission::with_args(["from b"])).unwrap();

    lock_a.release().unwrap();
    assert_eq!(rec.count(), 0);
    lock_b.release().unwrap();
    assert_eq!(rec.count(), 1);
    assert_eq!(rec.last().unwrap().arg(0), Some(&Value::from("from b")));
}

#[test]
fn panic_inside_lock_releases_without_replay() {
    let sender = Sender::new().unwrap();
    let d = sender.dispatcher();
    let rec = Recorder::new();
    d.bind("on_test_a", rec.event_callback()).unwrap();
    let channel = d.get_channel("on_test_a").unwrap();

    let result = catch_unwind(AssertUnwindSafe(|| {
        let _lock = channel.emission_lock();
        sender.trigger_event("on_test_a", Emission::new()).unwrap();
        panic!("bail out");
    }));
    assert!(result.is_err());
    assert!(!channel.is_locked());
    assert_eq!(rec.count(), 0);

    sender.trigger_event("on_test_a", Emission::new()).unwrap();
    assert_eq!(rec.count(), 1);
}

#[test]
fn early_return_still_releases() {
    fn locked_work(sender: &Sender, bail: bool) -> Option<()> {
        let _lock = sender.dispatcher().emission_lock("on_test_a").ok()?;
        sender
            .trigger_event("on_test_a", Emission::with_args([1]))
            .ok()?;
        if bail {
            return None;
        }
        Some(())
    }

    let sender = Sender::new().unwrap();
    let rec = Recorder::new();
    sender
        .dispatcher()
        .bind("on_test_a", rec.event_callback())
        .unwrap();
    assert!(locked_work(&sender, true).is_none());
    assert_eq!(rec.count(), 1);
    assert!(!sender.dispatcher().get_channel("on_test_a").unwrap().is_locked());
}
