//! Vendor sensor keys to canonical sensor types

use once_cell::sync::Lazy;
use std::collections::HashMap;

static CANONICAL_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("temp", "temperature"),
        ("temperature", "temperature"),
        ("hum", "humidity"),
        ("humidity", "humidity"),
        ("pressure", "pressure"),
        ("press", "pressure"),
        ("baro", "pressure"),
        ("lux", "light"),
        ("light", "light"),
        ("soil", "soil_moisture"),
        ("soil_moisture", "soil_moisture"),
        ("moisture", "soil_moisture"),
        ("co2", "co2"),
        ("bat", "battery"),
        ("battery", "battery"),
        ("batt", "battery"),
        ("lat", "gps_latitude"),
        ("latitude", "gps_latitude"),
        ("gps_lat", "gps_latitude"),
        ("lng", "gps_longitude"),
        ("lon", "gps_longitude"),
        ("longitude", "gps_longitude"),
        ("gps_lng", "gps_longitude"),
        ("alt", "gps_altitude"),
        ("altitude", "gps_altitude"),
        ("wifi_signal", "wifi_signal"),
        ("wifi_rssi", "wifi_signal"),
        ("rssi", "wifi_signal"),
    ])
});

/// Canonical type for a vendor key; unmapped keys pass through unchanged
pub fn canonical_sensor_type(vendor_key: &str) -> &str {
    CANONICAL_TYPES.get(vendor_key).copied().unwrap_or(vendor_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_aliases() {
        assert_eq!(canonical_sensor_type("temp"), "temperature");
        assert_eq!(canonical_sensor_type("hum"), "humidity");
        assert_eq!(canonical_sensor_type("lat"), "gps_latitude");
        assert_eq!(canonical_sensor_type("lon"), "gps_longitude");
        assert_eq!(canonical_sensor_type("wifi_rssi"), "wifi_signal");
    }

    #[test]
    fn test_unmapped_passes_through() {
        assert_eq!(canonical_sensor_type("radiation"), "radiation");
        assert_eq!(canonical_sensor_type("Temp"), "Temp");
    }
}
