use ulid::Ulid;

use crate::model::{Household, Reservation};

/// The household acting on a connection. Built by the front end from the
/// login name and passed explicitly into every mutating store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub household: Household,
}

impl Session {
    pub fn new(household: Household) -> Self {
        Self { household }
    }

    pub fn household_id(&self) -> Ulid {
        self.household.id
    }

    pub fn owns(&self, reservation: &Reservation) -> bool {
        reservation.user_id == self.household.id
    }
}
