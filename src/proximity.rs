use std::str::FromStr;

use crate::error::ScheduleError;
use crate::feed::{Agency, Stop};

pub const DEFAULT_MAX_DISTANCE_KM: f64 = 10.0;
pub const DEFAULT_AGENCY_MAX_DISTANCE_KM: f64 = 100.0;
pub const MAX_NEARBY_RESULTS: usize = 100;

const MILES_PER_DEGREE: f64 = 69.0;
const KILOMETERS_PER_DEGREE: f64 = 111.12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceUnit {
    #[default]
    Kilometers,
    Miles,
}

impl FromStr for DistanceUnit {
    type Err = ScheduleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "kilometers" => Ok(DistanceUnit::Kilometers),
            "miles" => Ok(DistanceUnit::Miles),
            other => Err(ScheduleError::InvalidDistanceUnit(other.to_string())),
        }
    }
}

impl DistanceUnit {
    /// Distance expressed in degrees of arc. Miles are rounded to five
    /// decimals, kilometers are not.
    pub fn to_degrees(self, distance: f64) -> f64 {
        match self {
            DistanceUnit::Miles => (distance / MILES_PER_DEGREE * 100_000.0).round() / 100_000.0,
            DistanceUnit::Kilometers => distance / KILOMETERS_PER_DEGREE,
        }
    }
}

/// Search radius in degrees. Without `max_distance` the default is taken in
/// kilometers and `unit` is ignored.
pub fn search_radius(
    max_distance: Option<f64>,
    unit: Option<&str>,
    default_km: f64,
) -> Result<f64, ScheduleError> {
    let (distance, unit) = match max_distance {
        Some(distance) => (
            distance,
            unit.map(str::parse::<DistanceUnit>)
                .transpose()?
                .unwrap_or_default(),
        ),
        None => (default_km, DistanceUnit::Kilometers),
    };
    Ok(unit.to_degrees(distance))
}

/// Something with a position that can be ranked by distance.
pub trait Located {
    /// `(lat, lon)`, if known.
    fn position(&self) -> Option<(f64, f64)>;

    /// Orders entries at the same distance.
    fn tie_break(&self) -> (&str, &str);
}

impl Located for Stop {
    fn position(&self) -> Option<(f64, f64)> {
        Some((self.stop_lat, self.stop_lon))
    }

    fn tie_break(&self) -> (&str, &str) {
        (&self.agency_key, &self.stop_id)
    }
}

impl Located for Agency {
    fn position(&self) -> Option<(f64, f64)> {
        self.center()
    }

    fn tie_break(&self) -> (&str, &str) {
        (&self.agency_key, self.agency_id.as_deref().unwrap_or_default())
    }
}

/// Flat distance in degree space, which is what the radius is measured in.
pub fn planar_distance(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    (lat_a - lat_b).hypot(lon_a - lon_b)
}

/// Keeps entries within `radius` degrees of the point, nearest first.
/// Entries without a position are dropped.
pub fn rank_nearby<T: Located>(items: Vec<T>, lat: f64, lon: f64, radius: f64) -> Vec<T> {
    let mut ranked: Vec<(f64, T)> = items
        .into_iter()
        .filter_map(|item| {
            let (item_lat, item_lon) = item.position()?;
            Some((planar_distance(lat, lon, item_lat, item_lon), item))
        })
        .filter(|(distance, _)| *distance <= radius)
        .collect();
    ranked.sort_by(|(a, item_a), (b, item_b)| {
        a.total_cmp(b)
            .then_with(|| item_a.tie_break().cmp(&item_b.tie_break()))
    });
    ranked.truncate(MAX_NEARBY_RESULTS);
    ranked.into_iter().map(|(_, item)| item).collect()
}
