use glam::DVec3;

use crate::models::{
    common::{DetectableId, DetectableKind},
    pathway::PathRelativePosition,
};

/// 全てのシミュレーションエージェントが実装する基本インターフェース
pub trait IAgent {
    /// エージェントIDの取得
    fn get_id(&self) -> DetectableId;

    /// エージェントがアクティブかどうか
    fn is_active(&self) -> bool;
}

/// レーダーで検知可能なオブジェクトのインターフェース
pub trait IDetectable {
    /// 識別子
    fn detectable_id(&self) -> DetectableId;

    /// 種類（ビークルまたは障害物）
    fn kind(&self) -> DetectableKind;

    /// 現在位置
    fn position(&self) -> DVec3;

    /// 半径
    fn radius(&self) -> f64;

    /// 半径の二乗
    fn squared_radius(&self) -> f64 {
        self.radius() * self.radius()
    }

    /// 速度（静止物体はゼロ）
    fn velocity(&self) -> DVec3 {
        DVec3::ZERO
    }

    /// 前方向（向きを持たない物体はゼロ）
    fn forward(&self) -> DVec3 {
        DVec3::ZERO
    }

    /// 速度の大きさ
    fn speed(&self) -> f64 {
        self.velocity().length()
    }

    /// 将来位置の予測（等速直線運動を仮定、静止物体は現在位置）
    fn predict_future_position(&self, prediction_time: f64) -> DVec3 {
        self.position() + self.velocity() * prediction_time
    }
}

/// 操舵力で移動するエージェントのインターフェース
pub trait IMovable {
    /// 操舵力を適用して状態を積分
    fn apply_steering_force(&mut self, force: DVec3, dt: f64);

    /// 位置を直接設定（移動距離や曲率の計測は新しい位置から再開）
    fn set_position(&mut self, position: DVec3);
}

/// 経路（チューブ状の通路）のインターフェース
pub trait IPathway {
    /// 経路の全長
    fn total_path_length(&self) -> f64;

    /// 始点
    fn first_point(&self) -> DVec3;

    /// 終点
    fn last_point(&self) -> DVec3;

    /// 線分数
    fn segment_count(&self) -> usize;

    /// チューブ半径
    fn radius(&self) -> f64;

    /// 点を経路上の最近点に写像し、経路に対する相対位置も返す
    fn map_point_to_path(&self, point: DVec3) -> (DVec3, PathRelativePosition);

    /// 経路長から経路上の点へ写像（範囲外は端点にクランプ）
    fn map_path_distance_to_point(&self, path_distance: f64) -> DVec3;

    /// 点から経路長へ写像（0..=全長）
    fn map_point_to_path_distance(&self, point: DVec3) -> f64;

    /// 点がチューブ内にあるか
    fn is_inside_path(&self, point: DVec3) -> bool {
        self.map_point_to_path(point).1.outside < 0.0
    }

    /// チューブ外側への距離（内側は負）
    fn how_far_outside_path(&self, point: DVec3) -> f64 {
        self.map_point_to_path(point).1.outside
    }
}
