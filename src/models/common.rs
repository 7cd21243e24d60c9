use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// ゼロ判定に使用する許容誤差
pub const EPSILON: f64 = 1e-9;

/// 検知可能オブジェクトの識別子
///
/// 空間インデックス、レーダー、近傍リストはすべてこのIDでオブジェクトを参照します。
/// 参照先が破棄された場合でもIDは残るため、利用側は必ずインデックスで存在確認を行います。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DetectableId(pub u32);

impl fmt::Display for DetectableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// エージェントのライフサイクル状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Pending,     // 生成済み、出現時刻待ち
    Active,      // アクティブ（インデックス登録済み）
    Inactive,    // 非アクティブ（登録解除済み）
    Destroyed,   // 破棄済み
}

/// 検知可能オブジェクトの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectableKind {
    Vehicle,
    Obstacle,
}

/// 数学ユーティリティ関数
///
/// ステアリング計算で共通に使うベクトル演算をまとめています。
/// すべての関数は退化入力（長さ0のベクトルなど）に対して安全な値を返します。
pub mod math_utils {
    use super::EPSILON;
    use glam::DVec3;
    use rand::Rng;

    /// 値を[min, max]に制限（min > maxでもパニックしない）
    pub fn clip(x: f64, min: f64, max: f64) -> f64 {
        if x < min {
            min
        } else if x > max {
            max
        } else {
            x
        }
    }

    /// 線形補間（alpha=0でx0, alpha=1でx1）
    pub fn interpolate(alpha: f64, x0: f64, x1: f64) -> f64 {
        x0 + (x1 - x0) * alpha
    }

    /// 角度（度）から余弦を計算
    pub fn cos_from_degrees(angle_deg: f64) -> f64 {
        angle_deg.to_radians().cos()
    }

    /// 余弦から角度（度）を計算
    pub fn degrees_from_cos(cos: f64) -> f64 {
        clip(cos, -1.0, 1.0).acos().to_degrees()
    }

    /// ベクトルの長さをmax_length以下に切り詰める
    pub fn truncate_length(v: DVec3, max_length: f64) -> DVec3 {
        if max_length <= 0.0 {
            return DVec3::ZERO;
        }
        let length_squared = v.length_squared();
        if length_squared > max_length * max_length {
            v * (max_length / length_squared.sqrt())
        } else {
            v
        }
    }

    /// 単位基底ベクトルに平行な成分
    pub fn parallel_component(source: DVec3, unit_basis: DVec3) -> DVec3 {
        unit_basis * source.dot(unit_basis)
    }

    /// 単位基底ベクトルに垂直な成分（basisは単位長を仮定）
    pub fn perpendicular_component(source: DVec3, unit_basis: DVec3) -> DVec3 {
        source - parallel_component(source, unit_basis)
    }

    /// 偏差角の制限ユーティリティ
    ///
    /// `inside`がtrueの場合、sourceをbasisを軸とする円錐の内側に収めます。
    /// falseの場合は外側に押し出します。長さは元のsourceと同じに保たれます。
    ///
    /// # 引数
    ///
    /// * `inside` - 円錐の内側に制限するか外側に制限するか
    /// * `source` - 制限対象のベクトル
    /// * `cosine_of_cone_angle` - 円錐の半頂角の余弦
    /// * `basis` - 円錐の軸（単位ベクトル）
    pub fn vec_limit_deviation_angle(
        inside: bool,
        source: DVec3,
        cosine_of_cone_angle: f64,
        basis: DVec3,
    ) -> DVec3 {
        let source_length = source.length();
        if source_length <= EPSILON {
            return source;
        }

        let direction = source / source_length;
        let cosine_of_source_angle = direction.dot(basis);

        if inside {
            if cosine_of_source_angle >= cosine_of_cone_angle {
                return source;
            }
        } else if cosine_of_source_angle <= cosine_of_cone_angle {
            return source;
        }

        let cosine = clip(cosine_of_cone_angle, -1.0, 1.0);
        let perp = perpendicular_component(source, basis);
        let perp_dist = (1.0 - cosine * cosine).sqrt();
        let c0 = basis * cosine;
        let c1 = perp.normalize_or_zero() * perp_dist;
        (c0 + c1) * source_length
    }

    /// sourceをbasis周りの円錐内に収める
    pub fn limit_max_deviation_angle(source: DVec3, cosine_of_cone_angle: f64, basis: DVec3) -> DVec3 {
        vec_limit_deviation_angle(true, source, cosine_of_cone_angle, basis)
    }

    /// 指数平滑（新しい値をsmooth_rateの割合でアキュムレータに混ぜる）
    pub fn blend_into_accumulator(smooth_rate: f64, new_value: DVec3, accumulator: DVec3) -> DVec3 {
        accumulator.lerp(new_value, clip(smooth_rate, 0.0, 1.0))
    }

    /// スカラー版の指数平滑
    pub fn blend_scalar_into_accumulator(smooth_rate: f64, new_value: f64, accumulator: f64) -> f64 {
        interpolate(clip(smooth_rate, 0.0, 1.0), accumulator, new_value)
    }

    /// スカラーのランダムウォーク（結果は[min, max]に制限）
    pub fn scalar_random_walk<R: Rng + ?Sized>(
        initial: f64,
        walk_speed: f64,
        min: f64,
        max: f64,
        rng: &mut R,
    ) -> f64 {
        let step: f64 = rng.gen_range(-1.0..=1.0);
        clip(initial + step * walk_speed, min, max)
    }

    /// 区間比較: x < lowerなら-1、x > upperなら+1、それ以外は0
    pub fn interval_comparison(x: f64, lower_bound: f64, upper_bound: f64) -> i8 {
        if x < lower_bound {
            -1
        } else if x > upper_bound {
            1
        } else {
            0
        }
    }

    /// 点と線分の最近点計算の結果
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct SegmentProjection {
        /// 点から線分までの距離
        pub distance: f64,
        /// 線分上の最近点
        pub chosen_point: DVec3,
        /// 線分始点からの射影長（0..=segment_length）
        pub projection: f64,
    }

    /// 点から線分までの距離（線分の単位法線と長さは事前計算済みのものを使用）
    pub fn point_to_segment_distance(
        point: DVec3,
        ep0: DVec3,
        ep1: DVec3,
        segment_normal: DVec3,
        segment_length: f64,
    ) -> SegmentProjection {
        let local = point - ep0;
        let projection = segment_normal.dot(local);

        if projection < 0.0 {
            return SegmentProjection {
                distance: local.length(),
                chosen_point: ep0,
                projection: 0.0,
            };
        }
        if projection > segment_length {
            return SegmentProjection {
                distance: (point - ep1).length(),
                chosen_point: ep1,
                projection: segment_length,
            };
        }

        let chosen_point = ep0 + segment_normal * projection;
        SegmentProjection {
            distance: point.distance(chosen_point),
            chosen_point,
            projection,
        }
    }

    /// 球の外に出た点を反対側に折り返す
    pub fn spherical_wrap_around(source: DVec3, center: DVec3, radius: f64) -> DVec3 {
        let offset = source - center;
        let r = offset.length();
        if r > radius {
            source + (offset / r) * radius * -2.0
        } else {
            source
        }
    }
}

/// 設定ファイル由来の座標をベクトルに変換するためのヘルパー
pub fn vec3(x: f64, y: f64, z: f64) -> DVec3 {
    DVec3::new(x, y, z)
}
