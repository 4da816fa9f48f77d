//! Seat assignment: a variable roster onto a fixed ring of seats.
//!
//! A login keeps its seat for as long as it stays in the roster. Freed seats
//! go to unseated players in roster order, lowest seat index first.

use crate::model::{Player, Seating};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct SeatEngine {
    seat_count: usize,
    assignments: HashMap<String, usize>,
    /// Names from the last waiting list, shown when the roster itself has
    /// no overflow to offer.
    queue_names: Vec<String>,
}

impl SeatEngine {
    pub fn new(seat_count: usize) -> Self {
        Self {
            seat_count,
            assignments: HashMap::new(),
            queue_names: Vec::new(),
        }
    }

    pub fn seat_count(&self) -> usize {
        self.seat_count
    }

    /// Reconcile assignments with `logins` (roster order) and return the
    /// resulting map.
    pub fn sync_seats<'a, I>(&mut self, logins: I) -> &HashMap<String, usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let roster: Vec<&str> = logins.into_iter().collect();
        let present: BTreeSet<&str> = roster.iter().copied().collect();
        self.assignments.retain(|login, _| present.contains(login.as_str()));

        let mut occupied: BTreeSet<usize> = self.assignments.values().copied().collect();
        let mut free = (0..self.seat_count).filter(|s| !occupied.contains(s)).collect::<Vec<_>>().into_iter();

        for login in roster {
            if self.assignments.contains_key(login) {
                continue;
            }
            let Some(seat) = free.next() else {
                break;
            };
            occupied.insert(seat);
            self.assignments.insert(login.to_string(), seat);
        }
        &self.assignments
    }

    pub fn seat_of(&self, login: &str) -> Option<usize> {
        self.assignments.get(login).copied()
    }

    pub fn is_seated(&self, login: &str) -> bool {
        self.assignments.contains_key(login)
    }

    pub fn by_seat(&self) -> BTreeMap<usize, String> {
        self.assignments.iter().map(|(l, s)| (*s, l.clone())).collect()
    }

    /// Rostered players left without a seat, in roster order.
    pub fn overflow<'p>(&self, players: &'p [Player]) -> Vec<&'p Player> {
        players.iter().filter(|p| !self.is_seated(&p.login)).collect()
    }

    pub fn set_queue_names(&mut self, names: Vec<String>) {
        self.queue_names = names;
    }

    /// Overflow display list capped to `cap`: the live overflow when there is
    /// one, otherwise the cached queue names.
    pub fn overflow_names(&self, players: &[Player], cap: usize) -> Vec<String> {
        let live: Vec<String> = self
            .overflow(players)
            .into_iter()
            .map(|p| p.display_name.clone())
            .take(cap)
            .collect();
        if !live.is_empty() {
            return live;
        }
        self.queue_names.iter().take(cap).cloned().collect()
    }

    pub fn seating(&self, players: &[Player], cap: usize) -> Seating {
        Seating {
            seat_count: self.seat_count,
            by_seat: self.by_seat(),
            overflow: self.overflow_names(players, cap),
        }
    }

    /// Resize the seat ring. Assignments that no longer fit are dropped and
    /// picked up again by the next sync.
    pub fn resize(&mut self, seat_count: usize) {
        self.seat_count = seat_count;
        self.assignments.retain(|_, seat| *seat < seat_count);
    }
}
