use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    pub async fn availability(&self, id: Ulid) -> Option<Availability> {
        let st = self.get_state(&id)?;
        let guard = st.read().await;
        Some(guard.availability.clone())
    }

    /// All availabilities ordered by start, then id.
    pub async fn availabilities(&self) -> Vec<Availability> {
        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for st in states {
            out.push(st.read().await.availability.clone());
        }
        out.sort_by_key(|a| (a.window.start, a.id));
        out
    }

    pub async fn availabilities_by_owner(&self, owner_id: PersonId) -> Vec<Availability> {
        let ids = self
            .by_owner
            .get(&owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(a) = self.availability(id).await {
                out.push(a);
            }
        }
        out.sort_by_key(|a| (a.window.start, a.id));
        out
    }

    pub async fn booking(&self, id: Ulid) -> Option<Booking> {
        let availability_id = self.booking_index.get(&id).map(|e| *e.value())?;
        let st = self.get_state(&availability_id)?;
        let guard = st.read().await;
        guard.bookings.iter().find(|b| b.id == id).cloned()
    }

    /// Every booking in every state, ordered by start, then id.
    pub async fn bookings(&self) -> Vec<Booking> {
        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for st in states {
            out.extend(st.read().await.bookings.iter().cloned());
        }
        out.sort_by_key(|b| (b.window.start, b.id));
        out
    }

    /// Bookings of one availability, ordered by start. Unknown ids yield nothing.
    pub async fn bookings_for(&self, availability_id: Ulid) -> Vec<Booking> {
        match self.get_state(&availability_id) {
            Some(st) => st.read().await.bookings.clone(),
            None => Vec::new(),
        }
    }

    pub fn availability_count(&self) -> usize {
        self.state.len()
    }

    pub fn booking_count(&self) -> usize {
        self.booking_index.len()
    }
}
