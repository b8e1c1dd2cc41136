// Environmental readings attached to every tile.
//
// `TileEnvironment` fields are private; the only ways to build one are the
// validated constructor, the validated `with_*` builders, and
// deserialization (which routes through the same checks via
// `#[serde(try_from)]`). Out-of-range readings are rejected, never clamped.
//
// See also: `tile.rs` for how readings affect affordances and movement cost,
// `terrain.rs` (`EnvironmentRules`) for the thresholds.

use crate::error::EnvironmentError;
use serde::{Deserialize, Serialize};

pub const MIN_TEMPERATURE: f32 = -100.0;
pub const MAX_TEMPERATURE: f32 = 100.0;

/// Fluid present on a tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FluidType {
    #[default]
    None,
    Water,
    Lava,
    Gas,
    Oil,
    Acid,
}

/// Validated environment readings for one tile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EnvironmentRecord", into = "EnvironmentRecord")]
pub struct TileEnvironment {
    fluid: FluidType,
    temperature: f32,
    sound: f32,
    light: f32,
    moisture: f32,
}

impl Default for TileEnvironment {
    fn default() -> Self {
        Self {
            fluid: FluidType::None,
            temperature: 20.0,
            sound: 0.0,
            light: 1.0,
            moisture: 0.0,
        }
    }
}

fn check(field: &'static str, value: f32, min: f32, max: f32) -> Result<f32, EnvironmentError> {
    // `contains` is false for NaN, so NaN is rejected here too.
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(EnvironmentError {
            field,
            value,
            min,
            max,
        })
    }
}

impl TileEnvironment {
    pub fn new(
        fluid: FluidType,
        temperature: f32,
        sound: f32,
        light: f32,
        moisture: f32,
    ) -> Result<Self, EnvironmentError> {
        Ok(Self {
            fluid,
            temperature: check("temperature", temperature, MIN_TEMPERATURE, MAX_TEMPERATURE)?,
            sound: check("sound", sound, 0.0, 1.0)?,
            light: check("light", light, 0.0, 1.0)?,
            moisture: check("moisture", moisture, 0.0, 1.0)?,
        })
    }

    #[must_use]
    pub fn with_fluid(mut self, fluid: FluidType) -> Self {
        self.fluid = fluid;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Result<Self, EnvironmentError> {
        self.temperature = check("temperature", temperature, MIN_TEMPERATURE, MAX_TEMPERATURE)?;
        Ok(self)
    }

    pub fn with_sound(mut self, sound: f32) -> Result<Self, EnvironmentError> {
        self.sound = check("sound", sound, 0.0, 1.0)?;
        Ok(self)
    }

    pub fn with_light(mut self, light: f32) -> Result<Self, EnvironmentError> {
        self.light = check("light", light, 0.0, 1.0)?;
        Ok(self)
    }

    pub fn with_moisture(mut self, moisture: f32) -> Result<Self, EnvironmentError> {
        self.moisture = check("moisture", moisture, 0.0, 1.0)?;
        Ok(self)
    }

    pub fn fluid(&self) -> FluidType {
        self.fluid
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn sound(&self) -> f32 {
        self.sound
    }

    pub fn light(&self) -> f32 {
        self.light
    }

    pub fn moisture(&self) -> f32 {
        self.moisture
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct EnvironmentRecord {
    #[serde(default)]
    fluid: FluidType,
    temperature: f32,
    sound: f32,
    light: f32,
    moisture: f32,
}

impl TryFrom<EnvironmentRecord> for TileEnvironment {
    type Error = EnvironmentError;
    fn try_from(r: EnvironmentRecord) -> Result<Self, Self::Error> {
        Self::new(r.fluid, r.temperature, r.sound, r.light, r.moisture)
    }
}

impl From<TileEnvironment> for EnvironmentRecord {
    fn from(e: TileEnvironment) -> Self {
        Self {
            fluid: e.fluid,
            temperature: e.temperature,
            sound: e.sound,
            light: e.light,
            moisture: e.moisture,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_mild() {
        let env = TileEnvironment::default();
        assert_eq!(env.fluid(), FluidType::None);
        assert_eq!(env.temperature(), 20.0);
        assert_eq!(env.light(), 1.0);
        assert_eq!(env.moisture(), 0.0);
    }

    #[test]
    fn out_of_range_is_rejected_not_clamped() {
        let err = TileEnvironment::default().with_moisture(1.2).unwrap_err();
        assert_eq!(err.field, "moisture");
        assert_eq!(err.value, 1.2);

        assert!(TileEnvironment::default().with_temperature(-150.0).is_err());
        assert!(TileEnvironment::default().with_light(f32::NAN).is_err());
        assert!(TileEnvironment::new(FluidType::Lava, 101.0, 0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn boundaries_are_inclusive() {
        let env = TileEnvironment::new(FluidType::Water, -100.0, 1.0, 0.0, 1.0).unwrap();
        assert_eq!(env.temperature(), -100.0);
        assert_eq!(env.sound(), 1.0);
    }

    #[test]
    fn deserialization_validates() {
        let json = r#"{"fluid":"WATER","temperature":5.0,"sound":0.1,"light":0.5,"moisture":0.9}"#;
        let env: TileEnvironment = serde_json::from_str(json).unwrap();
        assert_eq!(env.fluid(), FluidType::Water);

        let bad = r#"{"fluid":"WATER","temperature":5.0,"sound":0.1,"light":3.0,"moisture":0.9}"#;
        assert!(serde_json::from_str::<TileEnvironment>(bad).is_err());
    }
}
