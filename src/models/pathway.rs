use glam::DVec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{
    common::{EPSILON, math_utils},
    traits::IPathway,
};

/// 経路構築時のエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathwayError {
    #[error("経路には異なる2点以上が必要です（有効な点: {count}）")]
    TooFewPoints { count: usize },

    #[error("経路半径は正の値である必要があります: {0}")]
    InvalidRadius(f64),

    #[error("経路の座標に有限でない値が含まれています")]
    NonFinitePoint,
}

/// 経路に対する点の相対位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathRelativePosition {
    /// チューブ外側への距離（内側は負）
    pub outside: f64,
    /// 最近線分の接線方向
    pub tangent: DVec3,
    /// 最近線分のインデックス（0始まり）
    pub segment_index: usize,
}

/// 経路の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathwayKind {
    #[default]
    Polyline,
    Spline,
}

/// 折れ線経路
///
/// 線分の長さ・単位方向・累積長は構築時に一度だけ計算します。
#[derive(Debug, Clone, PartialEq)]
pub struct PolylinePathway {
    points: Vec<DVec3>,
    radius: f64,
    lengths: Vec<f64>,
    normals: Vec<DVec3>,
    cumulative: Vec<f64>,
    total_length: f64,
}

impl PolylinePathway {
    /// 折れ線経路を構築
    ///
    /// 連続する重複点は取り除かれます。
    ///
    /// # 引数
    ///
    /// * `points` - 経由点の列
    /// * `radius` - チューブ半径（正の値）
    pub fn new(points: &[DVec3], radius: f64) -> Result<Self, PathwayError> {
        if !(radius > 0.0) || !radius.is_finite() {
            return Err(PathwayError::InvalidRadius(radius));
        }
        if points.iter().any(|p| !p.is_finite()) {
            return Err(PathwayError::NonFinitePoint);
        }

        let mut distinct: Vec<DVec3> = Vec::with_capacity(points.len());
        for point in points {
            if distinct.last().is_none_or(|last| last.distance(*point) > EPSILON) {
                distinct.push(*point);
            }
        }
        if distinct.len() < 2 {
            return Err(PathwayError::TooFewPoints {
                count: distinct.len(),
            });
        }

        let segment_count = distinct.len() - 1;
        let mut lengths = Vec::with_capacity(segment_count);
        let mut normals = Vec::with_capacity(segment_count);
        let mut cumulative = Vec::with_capacity(segment_count);
        let mut total_length = 0.0;
        for pair in distinct.windows(2) {
            let delta = pair[1] - pair[0];
            let length = delta.length();
            cumulative.push(total_length);
            lengths.push(length);
            normals.push(delta / length);
            total_length += length;
        }

        Ok(Self {
            points: distinct,
            radius,
            lengths,
            normals,
            cumulative,
            total_length,
        })
    }

    pub fn points(&self) -> &[DVec3] {
        &self.points
    }

    pub fn segment_length(&self, segment: usize) -> Option<f64> {
        self.lengths.get(segment).copied()
    }

    pub fn segment_normal(&self, segment: usize) -> Option<DVec3> {
        self.normals.get(segment).copied()
    }

    /// 経路長を含む線分と、その線分内での割合(0..=1)を求める
    fn locate(&self, path_distance: f64) -> (usize, f64) {
        let last = self.lengths.len() - 1;
        for segment in 0..self.lengths.len() {
            let end = self.cumulative[segment] + self.lengths[segment];
            if path_distance <= end || segment == last {
                let ratio = (path_distance - self.cumulative[segment]) / self.lengths[segment];
                return (segment, math_utils::clip(ratio, 0.0, 1.0));
            }
        }
        (last, 1.0)
    }

    /// 最近線分の探索（最小距離が同じ場合は先の線分を採用）
    fn nearest_segment(&self, point: DVec3) -> (usize, math_utils::SegmentProjection) {
        let mut best = (
            0,
            math_utils::point_to_segment_distance(
                point,
                self.points[0],
                self.points[1],
                self.normals[0],
                self.lengths[0],
            ),
        );
        for segment in 1..self.lengths.len() {
            let projection = math_utils::point_to_segment_distance(
                point,
                self.points[segment],
                self.points[segment + 1],
                self.normals[segment],
                self.lengths[segment],
            );
            if projection.distance < best.1.distance {
                best = (segment, projection);
            }
        }
        best
    }
}

impl IPathway for PolylinePathway {
    fn total_path_length(&self) -> f64 {
        self.total_length
    }

    fn first_point(&self) -> DVec3 {
        self.points[0]
    }

    fn last_point(&self) -> DVec3 {
        self.points[self.points.len() - 1]
    }

    fn segment_count(&self) -> usize {
        self.lengths.len()
    }

    fn radius(&self) -> f64 {
        self.radius
    }

    fn map_point_to_path(&self, point: DVec3) -> (DVec3, PathRelativePosition) {
        let (segment, projection) = self.nearest_segment(point);
        let on_path = projection.chosen_point;
        (
            on_path,
            PathRelativePosition {
                outside: on_path.distance(point) - self.radius,
                tangent: self.normals[segment],
                segment_index: segment,
            },
        )
    }

    fn map_path_distance_to_point(&self, path_distance: f64) -> DVec3 {
        if !(path_distance > 0.0) {
            return self.first_point();
        }
        if path_distance >= self.total_length {
            return self.last_point();
        }
        let (segment, ratio) = self.locate(path_distance);
        self.points[segment].lerp(self.points[segment + 1], ratio)
    }

    fn map_point_to_path_distance(&self, point: DVec3) -> f64 {
        let (segment, projection) = self.nearest_segment(point);
        self.cumulative[segment] + projection.projection
    }
}

/// 端点距離（合成制御点を経由点からどれだけ外挿するか）
const SPLINE_END_EXTENSION: f64 = 2.0;

/// Catmull-Romスプライン経路
///
/// 経由点の前後に、端の線分方向へ外挿した制御点を1つずつ追加します。
/// 各線分は前後の制御点を含む4点で評価され、経由点を必ず通過します。
#[derive(Debug, Clone, PartialEq)]
pub struct SplinePathway {
    base: PolylinePathway,
    control_points: Vec<DVec3>,
}

impl SplinePathway {
    pub fn new(points: &[DVec3], radius: f64) -> Result<Self, PathwayError> {
        let base = PolylinePathway::new(points, radius)?;
        let first_normal = base.normals[0];
        let last_normal = base.normals[base.normals.len() - 1];

        let mut control_points = Vec::with_capacity(base.points.len() + 2);
        control_points.push(base.first_point() - first_normal * SPLINE_END_EXTENSION);
        control_points.extend_from_slice(&base.points);
        control_points.push(base.last_point() + last_normal * SPLINE_END_EXTENSION);

        Ok(Self {
            base,
            control_points,
        })
    }

    pub fn control_points(&self) -> &[DVec3] {
        &self.control_points
    }

    pub fn polyline(&self) -> &PolylinePathway {
        &self.base
    }

    /// 線分`segment`上のパラメータ`u`(0..=1)における点
    pub fn segment_point(&self, segment: usize, u: f64) -> DVec3 {
        let segment = segment.min(self.base.segment_count() - 1);
        let a = self.control_points[segment];
        let b = self.control_points[segment + 1];
        let c = self.control_points[segment + 2];
        let d = self.control_points[segment + 3];
        let u2 = u * u;
        let u3 = u2 * u;
        0.5 * ((-a + 3.0 * b - 3.0 * c + d) * u3
            + (2.0 * a - 5.0 * b + 4.0 * c - d) * u2
            + (-a + c) * u
            + 2.0 * b)
    }
}

impl IPathway for SplinePathway {
    fn total_path_length(&self) -> f64 {
        self.base.total_path_length()
    }

    fn first_point(&self) -> DVec3 {
        self.base.first_point()
    }

    fn last_point(&self) -> DVec3 {
        self.base.last_point()
    }

    fn segment_count(&self) -> usize {
        self.base.segment_count()
    }

    fn radius(&self) -> f64 {
        self.base.radius
    }

    fn map_point_to_path(&self, point: DVec3) -> (DVec3, PathRelativePosition) {
        let (_, mut relative) = self.base.map_point_to_path(point);
        let path_distance = self.base.map_point_to_path_distance(point);
        let on_spline = self.map_path_distance_to_point(path_distance);
        relative.outside = on_spline.distance(point) - self.base.radius;
        (on_spline, relative)
    }

    fn map_path_distance_to_point(&self, path_distance: f64) -> DVec3 {
        if !(path_distance > 0.0) {
            return self.first_point();
        }
        if path_distance >= self.base.total_length {
            return self.last_point();
        }
        let (segment, ratio) = self.base.locate(path_distance);
        self.segment_point(segment, ratio)
    }

    fn map_point_to_path_distance(&self, point: DVec3) -> f64 {
        self.base.map_point_to_path_distance(point)
    }
}

/// 経路（折れ線またはスプライン）
#[derive(Debug, Clone, PartialEq)]
pub enum Pathway {
    Polyline(PolylinePathway),
    Spline(SplinePathway),
}

impl Pathway {
    pub fn new(kind: PathwayKind, points: &[DVec3], radius: f64) -> Result<Self, PathwayError> {
        Ok(match kind {
            PathwayKind::Polyline => Pathway::Polyline(PolylinePathway::new(points, radius)?),
            PathwayKind::Spline => Pathway::Spline(SplinePathway::new(points, radius)?),
        })
    }

    pub fn kind(&self) -> PathwayKind {
        match self {
            Pathway::Polyline(_) => PathwayKind::Polyline,
            Pathway::Spline(_) => PathwayKind::Spline,
        }
    }

    fn inner(&self) -> &dyn IPathway {
        match self {
            Pathway::Polyline(path) => path,
            Pathway::Spline(path) => path,
        }
    }
}

impl IPathway for Pathway {
    fn total_path_length(&self) -> f64 {
        self.inner().total_path_length()
    }

    fn first_point(&self) -> DVec3 {
        self.inner().first_point()
    }

    fn last_point(&self) -> DVec3 {
        self.inner().last_point()
    }

    fn segment_count(&self) -> usize {
        self.inner().segment_count()
    }

    fn radius(&self) -> f64 {
        self.inner().radius()
    }

    fn map_point_to_path(&self, point: DVec3) -> (DVec3, PathRelativePosition) {
        self.inner().map_point_to_path(point)
    }

    fn map_path_distance_to_point(&self, path_distance: f64) -> DVec3 {
        self.inner().map_path_distance_to_point(path_distance)
    }

    fn map_point_to_path_distance(&self, point: DVec3) -> f64 {
        self.inner().map_point_to_path_distance(point)
    }
}
