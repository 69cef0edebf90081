use dispatch_core::geo::GeoPoint;
use dispatch_core::identity::Caller;
use dispatch_core::model::{
    AccountId, ApprovalState, DriverId, OnlineState, VehicleCategory, VehicleType,
};
use dispatch_core::registry::NewDriver;
use dispatch_core::test_helpers::damascus_center;

use super::engine::TestEngine;

/// A driver registered through the engine, with the caller it acts as.
#[derive(Debug, Clone, Copy)]
pub struct TestDriver {
    pub id: DriverId,
    pub caller: Caller,
}

/// Builder for driver fixtures. Defaults: approved, online taxi (sedan) at
/// the Damascus center.
#[derive(Debug, Clone)]
pub struct DriverBuilder {
    id: u128,
    vehicle: VehicleType,
    approval: ApprovalState,
    online: OnlineState,
    position: Option<GeoPoint>,
}

impl DriverBuilder {
    /// Driver `id`; its account is `1000 + id`.
    pub fn new(id: u128) -> Self {
        Self {
            id,
            vehicle: VehicleType::Sedan,
            approval: ApprovalState::Approved,
            online: OnlineState::Online,
            position: Some(damascus_center()),
        }
    }

    pub fn delivery(mut self) -> Self {
        self.vehicle = VehicleType::Motorcycle;
        self
    }

    pub fn vehicle(mut self, vehicle: VehicleType) -> Self {
        self.vehicle = vehicle;
        self
    }

    pub fn at(mut self, position: GeoPoint) -> Self {
        self.position = Some(position);
        self
    }

    pub fn without_position(mut self) -> Self {
        self.position = None;
        self
    }

    pub fn approval(mut self, approval: ApprovalState) -> Self {
        self.approval = approval;
        self
    }

    pub fn online(mut self, online: OnlineState) -> Self {
        self.online = online;
        self
    }

    pub fn driver_id(&self) -> DriverId {
        DriverId::from_u128(self.id)
    }

    pub fn caller(&self) -> Caller {
        Caller::driver(AccountId::from_u128(1000 + self.id))
    }

    pub(super) fn register(self, harness: &TestEngine) -> TestDriver {
        let engine = &harness.engine;
        let caller = self.caller();
        let category: VehicleCategory = self.vehicle.category();
        let new =
            NewDriver::new(caller.account_id, category, self.vehicle).with_id(self.driver_id());
        engine.register_driver(&harness.admin, new).expect("register driver");

        if self.approval != ApprovalState::Pending {
            engine
                .set_approval(&harness.admin, new.id, self.approval, Some("fixture".into()))
                .expect("set approval");
        }
        if let Some(position) = self.position {
            engine
                .report_position(&caller, position, None)
                .expect("report position");
        }
        if self.online != OnlineState::Offline {
            engine
                .set_online_state(&caller, self.online, None)
                .expect("set online state");
        }
        TestDriver { id: new.id, caller }
    }
}
