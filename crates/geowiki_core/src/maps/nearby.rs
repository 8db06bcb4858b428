use geo::{Closest, ClosestPoint, Coord, Distance, Euclidean, Intersects, Point};
use serde::Serialize;

use crate::config::NearbyConfig;
use crate::model::MapData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryFamily {
    Points,
    Polys,
    Lines,
}

impl GeometryFamily {
    /// Query order of the merged result.
    pub const ALL: [GeometryFamily; 3] = [Self::Points, Self::Polys, Self::Lines];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Points => "points",
            Self::Polys => "polys",
            Self::Lines => "lines",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyHit {
    pub page_id: i64,
    pub page_name: String,
    pub page_slug: String,
    pub family: GeometryFamily,
    /// Planar distance in degrees.
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Nearby {
    /// No point was supplied.
    NoLocation,
    Found(Vec<NearbyHit>),
}

/// Rank records by distance to `point`, nearest first, at most `config.limit` of them.
///
/// Each geometry family is searched on its own: a record qualifies for a family when every
/// vertex of that family lies within `config.radius_degrees` of the point. Each family keeps
/// its nearest `limit` hits; the lists are merged in points, polygons, lines order, stably
/// sorted, then truncated. A page matched by several families gets one hit per family.
pub fn find_nearby(records: &[MapData], point: Option<Point<f64>>, config: &NearbyConfig) -> Nearby {
    let Some(point) = point else {
        return Nearby::NoLocation;
    };

    let mut merged = Vec::new();
    for family in GeometryFamily::ALL {
        let mut hits: Vec<NearbyHit> = records
            .iter()
            .filter_map(|record| family_hit(record, family, point, config.radius_degrees))
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(config.limit);
        merged.extend(hits);
    }
    merged.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    merged.truncate(config.limit);
    Nearby::Found(merged)
}

fn family_hit(record: &MapData, family: GeometryFamily, point: Point<f64>, radius: f64) -> Option<NearbyHit> {
    let geometry = &record.geometry;
    let (coords, distance): (Vec<Coord<f64>>, Option<f64>) = match family {
        GeometryFamily::Points => {
            let points = geometry.points.as_ref()?;
            (
                points.0.iter().map(|point| point.0).collect(),
                closest_distance(points.closest_point(&point), point),
            )
        }
        GeometryFamily::Lines => {
            let lines = geometry.lines.as_ref()?;
            (
                lines.0.iter().flat_map(|line| line.0.iter().copied()).collect(),
                closest_distance(lines.closest_point(&point), point),
            )
        }
        GeometryFamily::Polys => {
            let polys = geometry.polys.as_ref()?;
            let distance = if polys.intersects(&point) {
                Some(0.0)
            } else {
                closest_distance(polys.closest_point(&point), point)
            };
            (
                polys
                    .0
                    .iter()
                    .flat_map(|poly| std::iter::once(poly.exterior()).chain(poly.interiors()))
                    .flat_map(|ring| ring.0.iter().copied())
                    .collect(),
                distance,
            )
        }
    };

    let contained = !coords.is_empty()
        && coords
            .iter()
            .all(|coord| Euclidean.distance(Point::from(*coord), point) <= radius);
    if !contained {
        return None;
    }
    Some(NearbyHit {
        page_id: record.page_id,
        page_name: record.page_name.clone(),
        page_slug: record.page_slug.clone(),
        family,
        distance: distance?,
    })
}

fn closest_distance(closest: Closest<f64>, point: Point<f64>) -> Option<f64> {
    match closest {
        Closest::Intersection(_) => Some(0.0),
        Closest::SinglePoint(nearest) => Some(Euclidean.distance(nearest, point)),
        Closest::Indeterminate => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::filter::tests::{line, point, square};

    fn found(result: Nearby) -> Vec<NearbyHit> {
        match result {
            Nearby::Found(hits) => hits,
            Nearby::NoLocation => panic!("expected hits"),
        }
    }

    #[test]
    fn missing_point_signals_no_location() {
        let records = vec![point(1, 0.0, 0.0)];
        assert_eq!(find_nearby(&records, None, &NearbyConfig::default()), Nearby::NoLocation);
    }

    #[test]
    fn hits_are_sorted_and_outside_radius_is_ignored() {
        let records = vec![
            point(1, 0.2, 0.0),
            point(2, 0.05, 0.0),
            line(3, vec![(0.1, 0.0), (0.1, 0.1)]),
            square(4, -0.01, -0.01, 0.02),
            point(5, 1.0, 1.0),
            line(6, vec![(0.0, 0.0), (0.5, 0.0)]),
        ];
        let hits = found(find_nearby(&records, Some(Point::new(0.0, 0.0)), &NearbyConfig::default()));
        let ids: Vec<_> = hits.iter().map(|hit| hit.page_id).collect();
        assert_eq!(ids, vec![4, 2, 3, 1]);
        assert_eq!(hits[0].family, GeometryFamily::Polys);
        assert_eq!(hits[0].distance, 0.0);
        assert!(hits.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
    }

    #[test]
    fn result_never_exceeds_limit() {
        let records: Vec<_> = (0..50)
            .map(|id| point(id, 0.001 * id as f64, 0.0))
            .chain((100..140).map(|id| square(id, 0.001 * (id - 100) as f64, 0.01, 0.001)))
            .collect();
        let config = NearbyConfig {
            radius_degrees: 0.3,
            limit: 30,
        };
        let hits = found(find_nearby(&records, Some(Point::new(0.0, 0.0)), &config));
        assert_eq!(hits.len(), 30);
        assert!(hits.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
    }

    #[test]
    fn page_matched_by_two_families_gets_a_hit_for_each() {
        let mut record = square(7, 0.0, 0.0, 0.01);
        record.geometry.points = point(7, 0.05, 0.05).geometry.points;
        let hits = found(find_nearby(&[record], Some(Point::new(0.005, 0.005)), &NearbyConfig::default()));
        let families: Vec<_> = hits.iter().map(|hit| (hit.page_id, hit.family)).collect();
        assert_eq!(families, vec![(7, GeometryFamily::Polys), (7, GeometryFamily::Points)]);
        assert_eq!(hits[0].distance, 0.0);
        assert!((hits[1].distance - 0.045f64.hypot(0.045)).abs() < 1e-9);
    }
}
