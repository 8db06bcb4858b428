//! Geometry attached to a page: multi-point, multi-line and multi-polygon parts, stored as WKT.

use anyhow::Result;
use geo::{
    BoundingRect, Centroid, Coord, Geometry, GeometryCollection, Haversine, Length, MultiLineString,
    MultiPoint, MultiPolygon, Point, Rect,
};
use wkt::{ToWkt, TryFromWkt};

use crate::error::GeowikiError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapGeometry {
    pub points: Option<MultiPoint<f64>>,
    pub lines: Option<MultiLineString<f64>>,
    pub polys: Option<MultiPolygon<f64>>,
}

/// WKT text of each part, as persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeometryWkt {
    pub points: Option<String>,
    pub lines: Option<String>,
    pub polys: Option<String>,
}

impl MapGeometry {
    pub fn from_point(x: f64, y: f64) -> Self {
        Self {
            points: Some(MultiPoint::new(vec![Point::new(x, y)])),
            ..Self::default()
        }
    }

    /// Empty parts collapse to `None` so an all-empty geometry reads as absent.
    pub fn new(
        points: Option<MultiPoint<f64>>,
        lines: Option<MultiLineString<f64>>,
        polys: Option<MultiPolygon<f64>>,
    ) -> Self {
        Self {
            points: points.filter(|value| !value.0.is_empty()),
            lines: lines.filter(|value| !value.0.is_empty()),
            polys: polys.filter(|value| !value.0.is_empty()),
        }
    }

    pub fn from_wkt(wkt: &GeometryWkt) -> Result<Self> {
        let points = wkt
            .points
            .as_deref()
            .map(|text| parse_part::<MultiPoint<f64>>(text, "points"))
            .transpose()?;
        let lines = wkt
            .lines
            .as_deref()
            .map(|text| parse_part::<MultiLineString<f64>>(text, "lines"))
            .transpose()?;
        let polys = wkt
            .polys
            .as_deref()
            .map(|text| parse_part::<MultiPolygon<f64>>(text, "polys"))
            .transpose()?;
        Ok(Self::new(points, lines, polys))
    }

    pub fn to_wkt(&self) -> GeometryWkt {
        GeometryWkt {
            points: self.points.as_ref().map(|value| value.wkt_string()),
            lines: self.lines.as_ref().map(|value| value.wkt_string()),
            polys: self.polys.as_ref().map(|value| value.wkt_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_none() && self.lines.is_none() && self.polys.is_none()
    }

    pub fn has_points(&self) -> bool {
        self.points.is_some()
    }

    pub fn has_lines(&self) -> bool {
        self.lines.is_some()
    }

    pub fn has_polys(&self) -> bool {
        self.polys.is_some()
    }

    /// Geodesic length in meters: every line plus every polygon ring. Points add nothing.
    pub fn length_meters(&self) -> f64 {
        let lines = self
            .lines
            .iter()
            .flat_map(|lines| lines.0.iter())
            .map(|line| Haversine.length(line))
            .sum::<f64>();
        let rings = self
            .polys
            .iter()
            .flat_map(|polys| polys.0.iter())
            .flat_map(|poly| std::iter::once(poly.exterior()).chain(poly.interiors()))
            .map(|ring| Haversine.length(ring))
            .sum::<f64>();
        lines + rings
    }

    /// All parts as one collection, points first.
    pub fn collection(&self) -> GeometryCollection<f64> {
        let mut parts = Vec::new();
        if let Some(points) = &self.points {
            parts.push(Geometry::MultiPoint(points.clone()));
        }
        if let Some(lines) = &self.lines {
            parts.push(Geometry::MultiLineString(lines.clone()));
        }
        if let Some(polys) = &self.polys {
            parts.push(Geometry::MultiPolygon(polys.clone()));
        }
        GeometryCollection::new_from(parts)
    }

    pub fn collection_wkt(&self) -> String {
        Geometry::GeometryCollection(self.collection()).wkt_string()
    }

    pub fn centroid(&self) -> Option<Point<f64>> {
        self.collection().centroid()
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.collection().bounding_rect()
    }

    /// Every coordinate of every part.
    pub fn coords(&self) -> impl Iterator<Item = Coord<f64>> + '_ {
        let points = self
            .points
            .iter()
            .flat_map(|points| points.0.iter().map(|point| point.0));
        let lines = self
            .lines
            .iter()
            .flat_map(|lines| lines.0.iter().flat_map(|line| line.0.iter().copied()));
        let polys = self.polys.iter().flat_map(|polys| {
            polys.0.iter().flat_map(|poly| {
                std::iter::once(poly.exterior())
                    .chain(poly.interiors())
                    .flat_map(|ring| ring.0.iter().copied())
            })
        });
        points.chain(lines).chain(polys)
    }

    pub fn all_coords_finite(&self) -> bool {
        self.coords().all(|coord| coord.x.is_finite() && coord.y.is_finite())
    }
}

pub fn parse_point_pair(x: &str, y: &str) -> Result<Point<f64>> {
    let x = parse_coordinate(x, "longitude")?;
    let y = parse_coordinate(y, "latitude")?;
    Ok(Point::new(x, y))
}

fn parse_coordinate(value: &str, label: &str) -> Result<f64> {
    let trimmed = value.trim();
    let parsed = trimmed.parse::<f64>().map_err(|_| {
        GeowikiError::Validation(format!("{label} is not a number: {trimmed:?}"))
    })?;
    if !parsed.is_finite() {
        return Err(GeowikiError::Validation(format!("{label} is not finite: {trimmed:?}")).into());
    }
    Ok(parsed)
}

/// Region outline: a `POLYGON` or `MULTIPOLYGON`.
pub fn parse_area_wkt(text: &str) -> Result<MultiPolygon<f64>> {
    match parse_part::<Geometry<f64>>(text, "area")? {
        Geometry::Polygon(polygon) => Ok(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(polygons) => Ok(polygons),
        _ => Err(GeowikiError::Geometry(format!(
            "area must be a POLYGON or MULTIPOLYGON: {text:?}"
        ))
        .into()),
    }
}

fn parse_part<G>(text: &str, label: &str) -> Result<G>
where
    G: TryFromWkt<f64>,
    G::Error: std::fmt::Display,
{
    G::try_from_wkt_str(text)
        .map_err(|err| GeowikiError::Geometry(format!("{label}: {err}")).into())
}

#[cfg(test)]
mod tests {
    use geo::{Distance, LineString, Polygon};

    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (x, y),
                (x + size, y),
                (x + size, y + size),
                (x, y + size),
                (x, y),
            ]),
            vec![],
        )
    }

    #[test]
    fn point_geometry_has_zero_length() {
        let geometry = MapGeometry::from_point(121.5, 25.0);
        assert!(geometry.has_points());
        assert_eq!(geometry.length_meters(), 0.0);
    }

    #[test]
    fn empty_parts_collapse_to_absent() {
        let geometry = MapGeometry::new(
            Some(MultiPoint::new(vec![])),
            Some(MultiLineString::new(vec![])),
            None,
        );
        assert!(geometry.is_empty());
    }

    #[test]
    fn wkt_round_trip_keeps_all_parts() {
        let geometry = MapGeometry::new(
            Some(MultiPoint::new(vec![Point::new(1.0, 2.0)])),
            Some(MultiLineString::new(vec![LineString::from(vec![
                (0.0, 0.0),
                (1.0, 1.0),
            ])])),
            Some(MultiPolygon::new(vec![square(0.0, 0.0, 1.0)])),
        );
        let decoded = MapGeometry::from_wkt(&geometry.to_wkt()).expect("decode");
        assert_eq!(decoded, geometry);
    }

    #[test]
    fn malformed_wkt_is_a_geometry_error() {
        let err = MapGeometry::from_wkt(&GeometryWkt {
            points: Some("MULTIPOINT (oops)".to_string()),
            ..GeometryWkt::default()
        })
        .expect_err("must fail");
        assert!(matches!(
            err.downcast_ref::<GeowikiError>(),
            Some(GeowikiError::Geometry(_))
        ));
    }

    #[test]
    fn one_degree_of_longitude_at_equator() {
        let meters: f64 = Haversine.distance(Point::new(0.0, 0.0), Point::new(1.0, 0.0));
        assert!((meters - 111_195.0).abs() < 10.0, "{meters}");
    }

    #[test]
    fn polygon_length_is_its_perimeter() {
        let geometry = MapGeometry::new(None, None, Some(MultiPolygon::new(vec![square(0.0, 0.0, 0.001)])));
        let expected = 4.0 * Haversine.distance(Point::new(0.0, 0.0), Point::new(0.001, 0.0));
        assert!((geometry.length_meters() - expected).abs() < 0.5);
    }

    #[test]
    fn coordinate_pairs_reject_garbage() {
        assert!(parse_point_pair("121.5", "25.0").is_ok());
        assert!(parse_point_pair("121.5", "north").is_err());
        assert!(parse_point_pair("NaN", "25.0").is_err());
    }

    #[test]
    fn areas_accept_only_polygons() {
        let area = parse_area_wkt("POLYGON ((0 0, 1 0, 1 1, 0 0))").expect("polygon");
        assert_eq!(area.0.len(), 1);
        assert!(parse_area_wkt("POINT (1 2)").is_err());
    }

    #[test]
    fn centroid_of_single_point_is_the_point() {
        let centroid = MapGeometry::from_point(3.0, 4.0).centroid().expect("centroid");
        assert_eq!(centroid, Point::new(3.0, 4.0));
    }
}
