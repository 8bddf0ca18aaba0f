//! Several instruments operated together

use std::any::Any;
use std::thread;
use tracing::{error, info};

use crate::error::{APS2Error, Result};
use crate::instrument::{APS2, BitfileSlot};
use crate::status::StatusRegisters;
use crate::transport::Transport;


/// A collection of independent APS2 units
///
/// Instruments share no state, so batch operations run on one scoped
/// thread per instrument. Results are returned in insertion order; a
/// failing unit does not stop the others.
pub struct Rack<T: Transport + Send> {
    units: Vec<APS2<T>>
}

impl<T: Transport + Send> Default for Rack<T> {
    fn default() -> Self {
        Rack::new()
    }
}

impl<T: Transport + Send> Rack<T> {

    pub fn new() -> Self {
        Rack { units: Vec::new() }
    }

    /// Add an instrument; returns its index
    pub fn add(&mut self, unit: APS2<T>) -> usize {
        self.units.push(unit);
        self.units.len() - 1
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&APS2<T>> {
        self.units.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut APS2<T>> {
        self.units.get_mut(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item=&APS2<T>> {
        self.units.iter()
    }

    /// Remove an instrument from the rack and hand it back
    pub fn remove(&mut self, idx: usize) -> Result<APS2<T>> {
        if idx >= self.units.len() {
            return Err(APS2Error::invalid(format!("no instrument at index {}", idx)));
        }
        Ok(self.units.remove(idx))
    }

    fn each<R, F>(&mut self, op: F) -> Vec<Result<R>>
        where R: Send, F: Fn(&mut APS2<T>) -> Result<R> + Sync {

        let op = &op;

        thread::scope(|s| {
            let handles: Vec<_> = self.units.iter_mut()
                .map(|unit| s.spawn(move || op(unit)))
                .collect();

            handles.into_iter()
                .enumerate()
                .map(|(unit, h)| match h.join() {
                    Ok(r) => r,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!("Worker for unit {} panicked: {}", unit, message);
                        Err(APS2Error::WorkerPanicked { unit, message })
                    }
                })
                .collect()
        })
    }

    /// Connect every instrument
    pub fn connect_all(&mut self) -> Vec<Result<()>> {
        info!("Connecting {} instruments", self.units.len());
        self.each(|unit| unit.connect())
    }

    /// Disconnect every instrument
    pub fn disconnect_all(&mut self) -> Vec<Result<()>> {
        self.each(|unit| unit.disconnect())
    }

    /// Read the status block of every instrument
    pub fn status_all(&mut self) -> Vec<Result<StatusRegisters>> {
        self.each(|unit| unit.read_status())
    }

    /// Bring every instrument up; see [`APS2::init`]
    pub fn init_all(&mut self, force_reload: bool, slot: BitfileSlot) -> Vec<Result<()>> {
        info!("Initialising {} instruments", self.units.len());
        self.each(move |unit| unit.init(force_reload, slot))
    }
}


fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        String::from("unknown panic")
    }
}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn panic_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u32), "unknown panic");
    }
}
