//! Protobuf parser for GTFS Realtime Vehicle Positions feeds.

use anyhow::Result;
use chrono::{DateTime, Utc};
use prost::Message;

use crate::gtfs_rt::FeedMessage;
use crate::model::VehicleLocation;

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Flattens a feed into [`VehicleLocation`] readings.
///
/// Entities without a vehicle id, a position, or a usable timestamp are
/// dropped here; everything else (missing trip id, stale timestamps) is
/// the filter's business, not the decoder's. A vehicle timestamp falls
/// back to the feed header timestamp when the entity doesn't carry its
/// own.
pub fn readings_from_feed(feed: &FeedMessage) -> Vec<VehicleLocation> {
    let header_ts = feed.header.timestamp;
    let mut readings = Vec::new();

    for entity in &feed.entity {
        let Some(vehicle) = &entity.vehicle else {
            continue;
        };
        let Some(position) = &vehicle.position else {
            continue;
        };

        let vehicle_id = vehicle
            .vehicle
            .as_ref()
            .and_then(|d| d.id.clone())
            .unwrap_or_default();
        if vehicle_id.is_empty() {
            continue;
        }

        let Some(timestamp) = vehicle
            .timestamp
            .or(header_ts)
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts as i64, 0))
        else {
            continue;
        };

        let trip = vehicle.trip.as_ref();
        readings.push(VehicleLocation {
            vehicle_id,
            timestamp,
            route_id: trip.and_then(|t| t.route_id.clone()).unwrap_or_default(),
            trip_id: trip.and_then(|t| t.trip_id.clone()).unwrap_or_default(),
            speed: position.speed,
            latitude: position.latitude as f64,
            longitude: position.longitude as f64,
            bearing: position.bearing,
            direction_id: trip.and_then(|t| t.direction_id),
        });
    }

    readings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::{
        FeedEntity, FeedHeader, Position, TripDescriptor, VehicleDescriptor, VehiclePosition,
    };

    fn feed_with(entities: Vec<FeedEntity>) -> FeedMessage {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                incrementality: None,
                timestamp: Some(1433160000),
                feed_version: None,
            },
            entity: entities,
        }
    }

    fn entity(id: &str, vehicle_id: &str, ts: Option<u64>) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            is_deleted: None,
            vehicle: Some(VehiclePosition {
                trip: Some(TripDescriptor {
                    trip_id: Some("1703892".to_string()),
                    route_id: Some("801".to_string()),
                    direction_id: Some(1),
                    start_time: None,
                    start_date: None,
                }),
                vehicle: Some(VehicleDescriptor {
                    id: Some(vehicle_id.to_string()),
                    label: None,
                    license_plate: None,
                }),
                position: Some(Position {
                    latitude: 30.2672,
                    longitude: -97.7431,
                    bearing: Some(90.0),
                    odometer: None,
                    speed: Some(7.5),
                }),
                current_stop_sequence: None,
                stop_id: None,
                current_status: None,
                timestamp: ts,
            }),
        }
    }

    #[test]
    fn test_parse_invalid_bytes() {
        let invalid = vec![0xFF, 0xFE, 0x00, 0x01];
        assert!(parse_feed(&invalid).is_err());
    }

    #[test]
    fn test_encode_decode_feed() {
        let feed = feed_with(vec![entity("e1", "5402", Some(1433160030))]);
        let parsed = parse_feed(&feed.encode_to_vec()).unwrap();
        assert_eq!(parsed.entity.len(), 1);
        assert_eq!(parsed.header.gtfs_realtime_version, "2.0");
    }

    #[test]
    fn test_readings_from_feed() {
        let feed = feed_with(vec![entity("e1", "5402", Some(1433160030))]);
        let readings = readings_from_feed(&feed);

        assert_eq!(readings.len(), 1);
        let r = &readings[0];
        assert_eq!(r.vehicle_id, "5402");
        assert_eq!(r.route_id, "801");
        assert_eq!(r.trip_id, "1703892");
        assert_eq!(r.timestamp.timestamp(), 1433160030);
        assert_eq!(r.speed, Some(7.5));
        assert_eq!(r.direction_id, Some(1));
    }

    #[test]
    fn test_timestamp_falls_back_to_header() {
        let feed = feed_with(vec![entity("e1", "5402", None)]);
        let readings = readings_from_feed(&feed);

        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].timestamp.timestamp(), 1433160000);
    }

    #[test]
    fn test_entity_without_vehicle_id_is_skipped() {
        let mut e = entity("e1", "5402", Some(1433160030));
        e.vehicle.as_mut().unwrap().vehicle = None;
        let feed = feed_with(vec![e]);

        assert!(readings_from_feed(&feed).is_empty());
    }

    #[test]
    fn test_entity_without_position_is_skipped() {
        let mut e = entity("e1", "5402", Some(1433160030));
        e.vehicle.as_mut().unwrap().position = None;
        let feed = feed_with(vec![e]);

        assert!(readings_from_feed(&feed).is_empty());
    }
}
