#![cfg(feature = "parallel")]

//! Scheduler waves, conflict serialization, data-parallel loops and the
//! parallel command buffer.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kestrel_ecs::prelude::*;
use kestrel_ecs::ComponentMask;

#[derive(Clone, Debug, PartialEq)]
struct Pos {
    x: f32,
}

impl Component for Pos {
    type Storage = VecStorage<Self>;
}

#[derive(Clone, Debug, PartialEq)]
struct Vel {
    dx: f32,
}

impl Component for Vel {
    type Storage = VecStorage<Self>;
}

type Order = Arc<Mutex<Vec<&'static str>>>;

fn mark(order: &Order, entry: &'static str) {
    order.lock().unwrap().push(entry);
}

fn index_of(order: &[&'static str], entry: &str) -> usize {
    order.iter().position(|&o| o == entry).unwrap()
}

fn setup_registry(count: usize) -> Registry {
    let mut registry = Registry::new();
    for i in 0..count {
        let e = registry.create().unwrap();
        registry.add(e, Pos { x: i as f32 }).unwrap();
        registry.add(e, Vel { dx: 1.0 }).unwrap();
    }
    registry
}

#[test]
fn conflicting_systems_serialize_in_registration_order() {
    let mut registry = setup_registry(64);
    let mut scheduler = Scheduler::with_threads(4).unwrap();
    let order: Order = Arc::new(Mutex::new(Vec::new()));

    let writes_pos = ComponentMask::of::<(Pos,)>().unwrap();
    let reads_pos = ComponentMask::of::<(Pos,)>().unwrap();
    let writes_vel = ComponentMask::of::<(Vel,)>().unwrap();

    let o = order.clone();
    scheduler.add_system("integrate", ComponentMask::new(), writes_pos, move |reg| {
        mark(&o, "integrate:start");
        std::thread::sleep(Duration::from_millis(20));
        let mut positions = reg.write_store::<Pos>().unwrap();
        for p in positions.data_mut() {
            p.x += 1.0;
        }
        mark(&o, "integrate:end");
    });

    let observed_sum = Arc::new(Mutex::new(0.0f32));
    let o = order.clone();
    let sum_slot = observed_sum.clone();
    scheduler.add_system("report", reads_pos, ComponentMask::new(), move |reg| {
        mark(&o, "report:start");
        let positions = reg.read_store::<Pos>().unwrap();
        *sum_slot.lock().unwrap() = positions.data().iter().map(|p| p.x).sum();
        mark(&o, "report:end");
    });

    let o = order.clone();
    scheduler.add_system("damp", ComponentMask::new(), writes_vel, move |reg| {
        mark(&o, "damp:start");
        let mut velocities = reg.write_store::<Vel>().unwrap();
        for v in velocities.data_mut() {
            v.dx *= 0.5;
        }
        mark(&o, "damp:end");
    });

    scheduler.run(&mut registry);

    let seen = order.lock().unwrap().clone();
    assert_eq!(seen.len(), 6);
    // "report" reads what "integrate" writes: strict serialization.
    assert!(index_of(&seen, "integrate:end") < index_of(&seen, "report:start"));
    // "report" saw the post-integration positions.
    let expected: f32 = (0..64).map(|i| i as f32 + 1.0).sum();
    assert_eq!(*observed_sum.lock().unwrap(), expected);
    // "damp" ran too.
    let vels = registry.read_store::<Vel>().unwrap();
    assert!(vels.data().iter().all(|v| v.dx == 0.5));
}

#[test]
fn non_conflicting_systems_share_a_wave() {
    let mut registry = setup_registry(8);
    let mut scheduler = Scheduler::with_threads(4).unwrap();

    // Two independent writers; if they share a wave, both see the other
    // in flight at least once with high probability. We only assert that
    // nothing deadlocks or panics and both effects land.
    let writes_pos = ComponentMask::of::<(Pos,)>().unwrap();
    let writes_vel = ComponentMask::of::<(Vel,)>().unwrap();

    scheduler.add_system("pos", ComponentMask::new(), writes_pos, |reg| {
        let mut positions = reg.write_store::<Pos>().unwrap();
        for p in positions.data_mut() {
            p.x = -1.0;
        }
    });
    scheduler.add_system("vel", ComponentMask::new(), writes_vel, |reg| {
        let mut velocities = reg.write_store::<Vel>().unwrap();
        for v in velocities.data_mut() {
            v.dx = -2.0;
        }
    });

    for _ in 0..10 {
        scheduler.run(&mut registry);
    }

    assert!(registry
        .read_store::<Pos>()
        .unwrap()
        .data()
        .iter()
        .all(|p| p.x == -1.0));
    assert!(registry
        .read_store::<Vel>()
        .unwrap()
        .data()
        .iter()
        .all(|v| v.dx == -2.0));
}

#[test]
fn conflicting_writers_never_overlap() {
    let mut registry = setup_registry(16);
    let mut scheduler = Scheduler::with_threads(4).unwrap();

    let in_flight = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicBool::new(false));

    for name in ["w1", "w2", "w3"] {
        let in_flight = in_flight.clone();
        let overlapped = overlapped.clone();
        let mask = ComponentMask::of::<(Pos,)>().unwrap();
        scheduler.add_system(name, ComponentMask::new(), mask, move |reg| {
            if in_flight.fetch_add(1, Ordering::SeqCst) != 0 {
                overlapped.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(5));
            let mut positions = reg.write_store::<Pos>().unwrap();
            for p in positions.data_mut() {
                p.x += 1.0;
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    scheduler.run(&mut registry);

    assert!(!overlapped.load(Ordering::SeqCst));
    let positions = registry.read_store::<Pos>().unwrap();
    for (i, p) in positions.data().iter().enumerate() {
        assert_eq!(p.x, i as f32 + 3.0);
    }
}

#[test]
fn disabled_systems_are_skipped() {
    let mut registry = setup_registry(4);
    let mut scheduler = Scheduler::with_threads(2).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    let counter = ran.clone();
    scheduler.add_system(
        "counting",
        ComponentMask::new(),
        ComponentMask::of::<(Pos,)>().unwrap(),
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );

    assert!(scheduler.is_system_enabled("counting"));
    scheduler.run(&mut registry);
    assert_eq!(ran.load(Ordering::SeqCst), 1);

    assert!(scheduler.set_system_enabled("counting", false));
    scheduler.run(&mut registry);
    assert_eq!(ran.load(Ordering::SeqCst), 1);

    assert!(scheduler.set_system_enabled("counting", true));
    scheduler.run(&mut registry);
    assert_eq!(ran.load(Ordering::SeqCst), 2);

    assert!(!scheduler.set_system_enabled("missing", true));
    assert!(!scheduler.is_system_enabled("missing"));
}

#[test]
fn parallel_for_visits_every_index_once() {
    let scheduler = Scheduler::with_threads(4).unwrap();
    let visits: Vec<AtomicUsize> = (0..1000).map(|_| AtomicUsize::new(0)).collect();
    let visits = Arc::new(visits);

    let v = visits.clone();
    scheduler.parallel_for(0, 1000, 64, move |i| {
        v[i].fetch_add(1, Ordering::SeqCst);
    });

    assert!(visits.iter().all(|v| v.load(Ordering::SeqCst) == 1));
}

#[test]
fn parallel_for_small_ranges_run_inline() {
    let scheduler = Scheduler::with_threads(2).unwrap();
    let sum = AtomicUsize::new(0);
    scheduler.parallel_for(10, 13, 100, |i| {
        sum.fetch_add(i, Ordering::SeqCst);
    });
    assert_eq!(sum.load(Ordering::SeqCst), 33);

    // Empty range: nothing runs.
    scheduler.parallel_for(5, 5, 8, |_| panic!("empty range must not call"));
}

#[test]
fn parallel_systems_mutate_through_command_buffer() {
    let mut registry = setup_registry(32);
    let mut scheduler = Scheduler::with_threads(4).unwrap();
    let commands = Arc::new(ParallelCommandBuffer::new());

    let reads_pos = ComponentMask::of::<(Pos,)>().unwrap();
    let queue = commands.clone();
    scheduler.add_system("cull", reads_pos, ComponentMask::new(), move |reg| {
        let positions = reg.read_store::<Pos>().unwrap();
        for (k, p) in positions.data().iter().enumerate() {
            if p.x >= 16.0 {
                queue.destroy(positions.entities()[k]);
            }
        }
    });

    let reads_vel = ComponentMask::of::<(Vel,)>().unwrap();
    let queue = commands.clone();
    scheduler.add_system("emit", reads_vel, ComponentMask::new(), move |_| {
        let spawned = queue.spawn();
        queue.add(spawned, Pos { x: 0.0 });
    });

    scheduler.run(&mut registry);
    commands.flush(&mut registry);

    // 32 - 16 culled + 1 spawned.
    assert_eq!(registry.entity_count(), 17);
    let positions = registry.read_store::<Pos>().unwrap();
    assert!(positions.data().iter().all(|p| p.x < 16.0));
}
