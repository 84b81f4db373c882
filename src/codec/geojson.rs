//! GeoJSON representation for `geo-types` geometries.
//!
//! [`GeoJsonModule`] teaches the codec to read and write
//! [`geo_types::Geometry`] and [`geo_types::Point`] bodies as RFC 7946
//! geometry objects instead of their serde form. Geometries nested inside a
//! larger body can opt into the same representation with
//! `#[serde(with = "streampost::codec::geojson::serde_geometry")]`.
//!
//! Conversion is done by the `geojson` crate: `Line` encodes as a
//! two-position `LineString`, `Rect` and `Triangle` encode as `Polygon`.
//! `bbox` and foreign members are accepted and dropped. Positions with more
//! than two coordinates lose the extra ones; shorter positions are rejected.

use geo_types::{Geometry, Point};
use geojson::Value as GeoJsonValue;
use serde_json::Value;

use super::module::{Module, ModuleRegistry};

/// Codec module for `geo-types` geometries.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonModule;

impl Module for GeoJsonModule {
    fn name(&self) -> &'static str {
        "geojson"
    }

    fn setup(&self, registry: &mut ModuleRegistry) {
        registry
            .register::<Geometry<f64>, _, _>(|geometry| Ok(to_value(geometry)?), from_value)
            .register::<Point<f64>, _, _>(
                |point| Ok(to_value(&Geometry::Point(*point))?),
                |value| match from_value(value)? {
                    Geometry::Point(point) => Ok(point),
                    _ => Err("expected a GeoJSON Point".into()),
                },
            );
    }
}

/// `serde(with)` helpers for geometry fields nested inside a body.
pub mod serde_geometry {
    use geo_types::Geometry;
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};

    pub fn serialize<S: Serializer>(geometry: &Geometry<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        geojson::Geometry::new(geojson::Value::from(geometry)).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Geometry<f64>, D::Error> {
        super::to_geometry(geojson::Geometry::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}

/// Encode a geometry as a GeoJSON value.
pub fn to_value(geometry: &Geometry<f64>) -> Result<Value, serde_json::Error> {
    serde_json::to_value(geojson::Geometry::new(GeoJsonValue::from(geometry)))
}

/// Decode a GeoJSON geometry object.
pub fn from_value(value: Value) -> Result<Geometry<f64>, tower::BoxError> {
    to_geometry(serde_json::from_value(value)?)
}

fn to_geometry(geometry: geojson::Geometry) -> Result<Geometry<f64>, tower::BoxError> {
    check_positions(&geometry.value)?;
    Ok(Geometry::<f64>::try_from(geometry)?)
}

/// The `geo-types` conversion indexes positions directly.
fn check_positions(value: &GeoJsonValue) -> Result<(), String> {
    let valid = match value {
        GeoJsonValue::Point(position) => position.len() >= 2,
        GeoJsonValue::MultiPoint(positions) | GeoJsonValue::LineString(positions) => {
            valid_positions(positions)
        }
        GeoJsonValue::MultiLineString(lines) => lines.iter().all(|line| valid_positions(line)),
        GeoJsonValue::Polygon(rings) => valid_polygon(rings),
        GeoJsonValue::MultiPolygon(polygons) => polygons.iter().all(|rings| valid_polygon(rings)),
        GeoJsonValue::GeometryCollection(geometries) => {
            return geometries
                .iter()
                .try_for_each(|geometry| check_positions(&geometry.value));
        }
    };

    if valid {
        Ok(())
    } else {
        Err("positions need two coordinates and polygons an exterior ring".to_owned())
    }
}

fn valid_positions(positions: &[Vec<f64>]) -> bool {
    positions.iter().all(|position| position.len() >= 2)
}

fn valid_polygon(rings: &[Vec<Vec<f64>>]) -> bool {
    !rings.is_empty() && rings.iter().all(|ring| valid_positions(ring))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{GeometryCollection, Line, Rect, Triangle, line_string, point, polygon};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[test]
    fn point_encodes_as_geojson() {
        let value = to_value(&Geometry::Point(point!(x: 13.4, y: 52.5))).unwrap();
        assert_eq!(value, json!({"type": "Point", "coordinates": [13.4, 52.5]}));
    }

    #[test]
    fn polygon_keeps_exterior_and_interiors() {
        let polygon = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 0.0)],
            interiors: [[(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0), (x: 1.0, y: 1.0)]]
        );
        let geometry = Geometry::Polygon(polygon);

        let value = to_value(&geometry).unwrap();
        assert_eq!(value["type"], "Polygon");
        assert_eq!(value["coordinates"].as_array().unwrap().len(), 2);

        let decoded: Geometry<f64> = from_value(value).unwrap();
        assert_eq!(decoded, geometry);
    }

    #[test]
    fn line_and_rect_use_geojson_equivalents() {
        let line = Geometry::Line(Line::new((0.0, 0.0), (1.0, 1.0)));
        assert_eq!(
            to_value(&line).unwrap(),
            json!({"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]})
        );

        let rect = Geometry::Rect(Rect::new((0.0, 0.0), (1.0, 1.0)));
        assert_eq!(to_value(&rect).unwrap()["type"], "Polygon");
    }

    #[test]
    fn collections_nest() {
        let geometry = Geometry::GeometryCollection(GeometryCollection(vec![
            Geometry::Point(point!(x: 1.0, y: 2.0)),
            Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.5)]),
        ]));
        let value = to_value(&geometry).unwrap();
        assert_eq!(value["geometries"][1]["type"], "LineString");

        let decoded: Geometry<f64> = from_value(value).unwrap();
        assert_eq!(decoded, geometry);
    }

    #[test]
    fn altitude_is_dropped_and_short_positions_rejected() {
        let decoded =
            from_value(json!({"type": "Point", "coordinates": [1.0, 2.0, 30.0]})).unwrap();
        assert_eq!(decoded, Geometry::Point(point!(x: 1.0, y: 2.0)));

        assert!(from_value(json!({"type": "Point", "coordinates": [1.0]})).is_err());
        assert!(
            from_value(json!({"type": "LineString", "coordinates": [[0.0, 0.0], [1.0]]})).is_err()
        );
        assert!(from_value(json!({"type": "Polygon", "coordinates": []})).is_err());
    }

    #[test]
    fn bbox_and_foreign_members_are_ignored() {
        let decoded = from_value(json!({
            "type": "Point",
            "coordinates": [1.0, 2.0],
            "bbox": [1.0, 2.0, 1.0, 2.0],
            "crs": {"name": "EPSG:4326"},
        }))
        .unwrap();
        assert_eq!(decoded, Geometry::Point(point!(x: 1.0, y: 2.0)));
    }

    #[test]
    fn triangle_encodes_as_polygon() {
        let triangle = Geometry::Triangle(Triangle::new(
            (0.0, 0.0).into(),
            (1.0, 0.0).into(),
            (0.0, 1.0).into(),
        ));
        let value = to_value(&triangle).unwrap();
        assert_eq!(value["type"], "Polygon");
        assert!(value["coordinates"][0].as_array().unwrap().len() >= 3);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sighting {
        name: String,
        #[serde(with = "serde_geometry")]
        location: Geometry<f64>,
    }

    #[test]
    fn nested_fields_share_the_representation() {
        let sighting = Sighting {
            name: "heron".into(),
            location: Geometry::Point(point!(x: 5.0, y: 6.0)),
        };
        let value = serde_json::to_value(&sighting).unwrap();
        assert_eq!(value["location"], json!({"type": "Point", "coordinates": [5.0, 6.0]}));
        assert_eq!(serde_json::from_value::<Sighting>(value).unwrap(), sighting);
    }

    #[test]
    fn point_module_rejects_other_geometries() {
        let mut registry = ModuleRegistry::new();
        registry.install(GeoJsonModule);

        let line = json!({"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]});
        assert!(registry.decode::<Point<f64>>(line).unwrap().is_err());

        let point = json!({"type": "Point", "coordinates": [3.0, 4.0]});
        assert_eq!(
            registry.decode::<Point<f64>>(point).unwrap().unwrap(),
            point!(x: 3.0, y: 4.0)
        );
    }
}
