//! `Adder`: the reference service the testable-property scenarios S1/S2 are
//! built around (spec §8). Reads input port `a`, writes inout port `b` as
//! `b = a + 1` on every `update`, and can be wired with an auto-connection
//! on either port — `b`'s own auto-connection demonstrates why a hook that
//! writes a port it also listens on must block that port's auto-connection
//! around the write.

use sight_core::{
    error::Result,
    service::{Access, AutoConnectionSpec, PortAccess, PortSpec, ServiceHooks, MODIFIED_SIGNAL},
};

pub const PORTS: &[PortSpec] = &[
    PortSpec::new("a", "int", Access::In),
    PortSpec::new("b", "int", Access::InOut),
];

/// Auto-connects both `a.modified` and `b.modified` to `update`; S1 only
/// ever writes `a` from outside so the `b` leg never fires, while S2 relies
/// on it firing and being blocked by `Adder`'s own write.
pub const AUTO_CONNS: &[AutoConnectionSpec] = &[
    AutoConnectionSpec {
        port_key: "a",
        signal_name: MODIFIED_SIGNAL,
        slot_name: "update",
    },
    AutoConnectionSpec {
        port_key: "b",
        signal_name: MODIFIED_SIGNAL,
        slot_name: "update",
    },
];

#[derive(Default)]
pub struct Adder;

impl ServiceHooks for Adder {
    fn ports(&self) -> &'static [PortSpec] {
        PORTS
    }

    fn auto_connections(&self) -> &'static [AutoConnectionSpec] {
        AUTO_CONNS
    }

    fn on_update(&self, ports: &dyn PortAccess) -> Result<()> {
        let a = ports
            .input("a")
            .ok_or_else(|| sight_core::RuntimeError::ResourceUnavailable("Adder: port `a` not bound".into()))?;
        let b = ports
            .input("b")
            .ok_or_else(|| sight_core::RuntimeError::ResourceUnavailable("Adder: port `b` not bound".into()))?;

        let a_value = *a.read::<i64>();

        // `b` is itself the source of an auto-connection back to `update`;
        // without this guard the write below would re-enter forever (S2).
        let _guard = ports.block_auto_connection("b");
        *b.write::<i64>() = a_value + 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sight_core::{
        service::{ServiceBase, ServiceCore},
        Id, IdRegistry, Object, WorkerPool,
    };
    use std::sync::Arc;

    #[test]
    fn s1_minimal_wiring_writes_b_equals_a_plus_one() {
        let pool = WorkerPool::new();
        let worker = pool.make("adder-s1");
        let svc = ServiceCore::new(Id::new("adder"), "Adder", worker.handle().clone(), Arc::new(IdRegistry::new()), Adder);

        let a = Arc::new(Object::new(Id::new("a"), "int", 0i64));
        let b = Arc::new(Object::new(Id::new("b"), "int", 0i64));
        svc.bind_port("a", a.clone()).unwrap();
        svc.bind_port("b", b.clone()).unwrap();
        svc.clone().start().wait().unwrap().unwrap();

        *a.write::<i64>() = 7;
        worker.handle().post(|| ()).wait(); // drain the auto-connection's queued task
        assert_eq!(*b.read::<i64>(), 8);
    }

    #[test]
    fn s2_blocker_prevents_self_reentry_from_b_auto_connection() {
        let pool = WorkerPool::new();
        let worker = pool.make("adder-s2");
        let svc = ServiceCore::new(Id::new("adder"), "Adder", worker.handle().clone(), Arc::new(IdRegistry::new()), Adder);

        let a = Arc::new(Object::new(Id::new("a"), "int", 0i64));
        let b = Arc::new(Object::new(Id::new("b"), "int", 0i64));
        svc.bind_port("a", a.clone()).unwrap();
        svc.bind_port("b", b.clone()).unwrap();
        svc.clone().start().wait().unwrap().unwrap();

        *a.write::<i64>() = 7;
        worker.handle().post(|| ()).wait();
        // A second trailing no-op: if the blocker failed, b's own write
        // would have queued another `update` task that lands here.
        worker.handle().post(|| ()).wait();
        assert_eq!(*b.read::<i64>(), 8, "exactly one update per external emission");
    }

    #[test]
    fn update_errors_when_mandatory_port_a_is_unbound() {
        let pool = WorkerPool::new();
        let worker = pool.make("adder-unbound-a");
        let svc = ServiceCore::new(Id::new("adder"), "Adder", worker.handle().clone(), Arc::new(IdRegistry::new()), Adder);

        let a = Arc::new(Object::new(Id::new("a"), "int", 0i64));
        let b = Arc::new(Object::new(Id::new("b"), "int", 0i64));
        svc.bind_port("a", a.clone()).unwrap();
        svc.bind_port("b", b.clone()).unwrap();
        svc.clone().start().wait().unwrap().unwrap();

        svc.unbind_port("a");
        let result = svc.clone().update().wait().unwrap();
        assert!(matches!(result, Err(sight_core::RuntimeError::ResourceUnavailable(_))));
    }
}
