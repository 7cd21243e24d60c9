use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::models::{
    common::{AgentStatus, DetectableId, DetectableKind, EPSILON, math_utils},
    local_space::LocalSpace,
    traits::{IAgent, IDetectable, IMovable},
};

/// 最小半径（これ未満の半径はクランプされる）
pub const MIN_RADIUS: f64 = 0.01;
/// 最小質量
pub const MIN_MASS: f64 = 1e-3;
/// 低速時の操舵力補正が効き始める速度の割合
const LOW_SPEED_RATIO: f64 = 0.2;
/// 曲率の平滑化係数（dtに乗じる）
const CURVATURE_SMOOTH_RATE: f64 = 4.0;
/// 平滑化位置の平滑化係数（dtに乗じる）
const POSITION_SMOOTH_RATE: f64 = 0.06;

/// 加速度の平滑化ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccelerationSmoothing {
    /// 固定の平滑化係数
    Fixed(f64),
    /// dtに比例する係数（clip(9·dt, 0.15, 0.4)）
    TimeScaled,
}

impl Default for AccelerationSmoothing {
    fn default() -> Self {
        AccelerationSmoothing::Fixed(0.4)
    }
}

impl AccelerationSmoothing {
    /// このステップで使用する平滑化係数
    pub fn rate(&self, dt: f64) -> f64 {
        match self {
            AccelerationSmoothing::Fixed(rate) => math_utils::clip(*rate, 0.0, 1.0),
            AccelerationSmoothing::TimeScaled => math_utils::clip(9.0 * dt, 0.15, 0.4),
        }
    }
}

/// 1ステップの積分結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrationReport {
    /// 入力された生の操舵力
    pub raw_force: DVec3,
    /// 低速補正と最大操舵力クリップ後の操舵力
    pub clipped_force: DVec3,
    /// 後処理適用前の速度（主操舵の結果）
    pub desired_velocity: DVec3,
    /// 最終的な速度
    pub velocity: DVec3,
    /// 後処理の置換速度が適用されたか
    pub post_processed: bool,
}

/// 読み取り専用のビークル状態スナップショット
///
/// 操舵力計算中に他エージェントから参照される値をまとめたものです。
/// 空間インデックスのエントリ更新にも使用されます。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleState {
    pub id: DetectableId,
    pub position: DVec3,
    pub forward: DVec3,
    pub velocity: DVec3,
    pub speed: f64,
    pub radius: f64,
    pub enabled: bool,
}

impl IDetectable for VehicleState {
    fn detectable_id(&self) -> DetectableId {
        self.id
    }

    fn kind(&self) -> DetectableKind {
        DetectableKind::Vehicle
    }

    fn position(&self) -> DVec3 {
        self.position
    }

    fn radius(&self) -> f64 {
        self.radius
    }

    fn velocity(&self) -> DVec3 {
        self.velocity
    }

    fn forward(&self) -> DVec3 {
        self.forward
    }

    fn speed(&self) -> f64 {
        self.speed
    }
}

/// 自律移動ビークル
///
/// 点質量として扱われ、操舵力を積分して位置と向きを更新します。
/// 速度は常に`forward × speed`で表され、その大きさは`max_speed`を超えません。
#[derive(Debug, Clone)]
pub struct Vehicle {
    /// 一意識別子
    pub id: DetectableId,
    /// シナリオ上の名前
    pub name: String,
    /// ライフサイクル状態
    pub status: AgentStatus,
    /// 出現時刻（秒）
    pub spawn_time: f64,
    /// 慣性を持つか（falseの場合、操舵力ゼロで即停止）
    pub has_inertia: bool,
    /// 移動可能か
    pub can_move: bool,
    /// 有効フラグ（無効なビークルはレーダー設定により検知対象外）
    pub enabled: bool,
    /// 低速時の操舵力補正を行うか
    pub adjust_low_speed_steering: bool,
    /// 加速度平滑化ポリシー
    pub acceleration_smoothing: AccelerationSmoothing,

    local_space: LocalSpace,
    speed: f64,
    mass: f64,
    radius: f64,
    max_force: f64,
    max_speed: f64,
    arrival_radius: f64,
    squared_arrival_radius: f64,

    smoothed_acceleration: DVec3,
    desired_velocity: DVec3,
    last_raw_force: DVec3,

    curvature: f64,
    smoothed_curvature: f64,
    last_forward: DVec3,
    last_position: DVec3,
    has_curvature_sample: bool,
    smoothed_position: DVec3,

    distance_traveled: f64,
}

impl Vehicle {
    /// 既定パラメータのビークルを作成
    ///
    /// # 引数
    ///
    /// * `id` - 一意識別子
    /// * `name` - シナリオ上の名前
    /// * `position` - 初期位置
    /// * `forward` - 初期の前方向（長さ0の場合は+Z）
    pub fn new(id: DetectableId, name: String, position: DVec3, forward: DVec3) -> Self {
        let local_space = LocalSpace::new(position, forward);
        let arrival_radius = 0.25;
        Self {
            id,
            name,
            status: AgentStatus::Pending,
            spawn_time: 0.0,
            has_inertia: true,
            can_move: true,
            enabled: true,
            adjust_low_speed_steering: true,
            acceleration_smoothing: AccelerationSmoothing::default(),
            local_space,
            speed: 0.0,
            mass: 1.0,
            radius: 0.5,
            max_force: 0.1,
            max_speed: 1.0,
            arrival_radius,
            squared_arrival_radius: arrival_radius * arrival_radius,
            smoothed_acceleration: DVec3::ZERO,
            desired_velocity: DVec3::ZERO,
            last_raw_force: DVec3::ZERO,
            curvature: 0.0,
            smoothed_curvature: 0.0,
            last_forward: local_space.forward,
            last_position: position,
            has_curvature_sample: false,
            smoothed_position: position,
            distance_traveled: 0.0,
        }
    }

    // --- パラメータ（設定時にクランプ） ---

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn set_mass(&mut self, mass: f64) {
        self.mass = if mass.is_finite() { mass.max(MIN_MASS) } else { 1.0 };
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn set_radius(&mut self, radius: f64) {
        self.radius = if radius.is_finite() { radius.max(MIN_RADIUS) } else { MIN_RADIUS };
    }

    pub fn max_force(&self) -> f64 {
        self.max_force
    }

    pub fn set_max_force(&mut self, max_force: f64) {
        self.max_force = if max_force.is_finite() { max_force.max(0.0) } else { 0.0 };
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// 最大速度を設定（現在速度も新しい上限に合わせる）
    pub fn set_max_speed(&mut self, max_speed: f64) {
        self.max_speed = if max_speed.is_finite() { max_speed.max(0.0) } else { 0.0 };
        self.speed = self.speed.min(self.max_speed);
    }

    pub fn arrival_radius(&self) -> f64 {
        self.arrival_radius
    }

    pub fn squared_arrival_radius(&self) -> f64 {
        self.squared_arrival_radius
    }

    pub fn set_arrival_radius(&mut self, arrival_radius: f64) {
        self.arrival_radius = if arrival_radius.is_finite() { arrival_radius.max(0.0) } else { 0.0 };
        self.squared_arrival_radius = self.arrival_radius * self.arrival_radius;
    }

    // --- 状態 ---

    pub fn local_space(&self) -> &LocalSpace {
        &self.local_space
    }

    pub fn position(&self) -> DVec3 {
        self.local_space.position
    }

    pub fn forward(&self) -> DVec3 {
        self.local_space.forward
    }

    pub fn side(&self) -> DVec3 {
        self.local_space.side
    }

    pub fn up(&self) -> DVec3 {
        self.local_space.up
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// 速度を設定（[0, max_speed]に制限）
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = math_utils::clip(speed, 0.0, self.max_speed);
    }

    /// 速度ベクトル = forward × speed
    pub fn velocity(&self) -> DVec3 {
        self.local_space.forward * self.speed
    }

    /// 直近の積分で主操舵が求めた速度（後処理適用前）
    pub fn desired_velocity(&self) -> DVec3 {
        self.desired_velocity
    }

    pub fn last_raw_force(&self) -> DVec3 {
        self.last_raw_force
    }

    pub fn smoothed_acceleration(&self) -> DVec3 {
        self.smoothed_acceleration
    }

    pub fn curvature(&self) -> f64 {
        self.curvature
    }

    pub fn smoothed_curvature(&self) -> f64 {
        self.smoothed_curvature
    }

    pub fn smoothed_position(&self) -> DVec3 {
        self.smoothed_position
    }

    /// 累積移動距離（メートル）
    pub fn distance_traveled(&self) -> f64 {
        self.distance_traveled
    }

    /// 読み取り専用スナップショット
    pub fn state(&self) -> VehicleState {
        VehicleState {
            id: self.id,
            position: self.position(),
            forward: self.forward(),
            velocity: self.velocity(),
            speed: self.speed,
            radius: self.radius,
            enabled: self.enabled,
        }
    }

    /// 運動状態を初期化（位置は保持）
    pub fn reset(&mut self) {
        self.speed = 0.0;
        self.smoothed_acceleration = DVec3::ZERO;
        self.desired_velocity = DVec3::ZERO;
        self.last_raw_force = DVec3::ZERO;
        self.curvature = 0.0;
        self.smoothed_curvature = 0.0;
        self.has_curvature_sample = false;
        self.smoothed_position = self.position();
        self.last_position = self.position();
        self.last_forward = self.forward();
    }

    pub fn reset_orientation(&mut self) {
        self.local_space.reset_orientation();
    }

    // --- 積分 ---

    /// 操舵力を積分（後処理なし）
    pub fn integrate(&mut self, force: DVec3, dt: f64) -> IntegrationReport {
        self.integrate_with(force, dt, |_| DVec3::ZERO)
    }

    /// 操舵力を積分し、後処理フックで速度を置換可能にする
    ///
    /// 後処理フックは主操舵の結果（`desired_velocity`）を更新済みのビークルを受け取り、
    /// 置換速度を返します。ゼロ以外の値が返された場合、最大速度でクランプされた上で
    /// 新しい速度として採用されます。
    ///
    /// # 引数
    ///
    /// * `force` - 操舵力（重み付け合計済み）
    /// * `dt` - 時間刻み（秒）
    /// * `post_process` - 後処理フック
    ///
    /// # 戻り値
    ///
    /// 積分結果のレポート
    pub fn integrate_with<F>(&mut self, force: DVec3, dt: f64, post_process: F) -> IntegrationReport
    where
        F: FnOnce(&Vehicle) -> DVec3,
    {
        let velocity = self.velocity();
        let mut report = IntegrationReport {
            raw_force: force,
            clipped_force: DVec3::ZERO,
            desired_velocity: velocity,
            velocity,
            post_processed: false,
        };

        if dt <= 0.0 || self.max_force <= 0.0 || self.max_speed <= 0.0 {
            return report;
        }
        if !self.can_move {
            self.speed = 0.0;
            report.velocity = DVec3::ZERO;
            return report;
        }

        self.last_raw_force = force;
        let adjusted = if self.adjust_low_speed_steering {
            self.adjust_raw_steering_force(force)
        } else {
            force
        };
        let clipped = math_utils::truncate_length(adjusted, self.max_force);
        report.clipped_force = clipped;

        let acceleration = clipped / self.mass;
        let mut new_velocity = if acceleration == DVec3::ZERO && !self.has_inertia {
            self.smoothed_acceleration = DVec3::ZERO;
            self.speed = 0.0;
            DVec3::ZERO
        } else {
            let rate = self.acceleration_smoothing.rate(dt);
            self.smoothed_acceleration =
                math_utils::blend_into_accumulator(rate, acceleration, self.smoothed_acceleration);
            math_utils::truncate_length(velocity + self.smoothed_acceleration * dt, self.max_speed)
        };

        self.desired_velocity = new_velocity;
        report.desired_velocity = new_velocity;

        let adjustment = post_process(self);
        if adjustment.length_squared() > 0.0 && adjustment.is_finite() {
            new_velocity = math_utils::truncate_length(adjustment, self.max_speed);
            report.post_processed = true;
        }

        self.speed = new_velocity.length().min(self.max_speed);
        let displacement = new_velocity * dt;
        self.local_space.position += displacement;
        self.distance_traveled += displacement.length();

        if self.speed > 0.0 {
            self.local_space
                .regenerate_orthonormal_basis_unit_forward(new_velocity / new_velocity.length());
        }

        self.measure_path_curvature(dt);
        self.smoothed_position = math_utils::blend_into_accumulator(
            dt * POSITION_SMOOTH_RATE,
            self.position(),
            self.smoothed_position,
        );

        report.velocity = self.velocity();
        report
    }

    /// 低速時の操舵力補正
    ///
    /// 速度が最大速度の20%以下の場合、操舵力を前方向周りの円錐に制限して
    /// 静止に近いビークルが急激に後方へ向きを変えることを防ぎます。
    pub fn adjust_raw_steering_force(&self, force: DVec3) -> DVec3 {
        let max_adjusted_speed = LOW_SPEED_RATIO * self.max_speed;
        if self.speed > max_adjusted_speed || force == DVec3::ZERO || max_adjusted_speed <= 0.0 {
            return force;
        }
        let range = self.speed / max_adjusted_speed;
        let cosine = math_utils::interpolate(range.powi(20), 1.0, -1.0);
        math_utils::limit_max_deviation_angle(force, cosine, self.forward())
    }

    /// 経路曲率の計測
    fn measure_path_curvature(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        if !self.has_curvature_sample {
            self.last_forward = self.forward();
            self.last_position = self.position();
            self.has_curvature_sample = true;
            return;
        }

        let dp = self.last_position - self.position();
        let dp_length = dp.length();
        if dp_length <= EPSILON {
            return;
        }
        let df = (self.last_forward - self.forward()) / dp_length;
        let lateral = math_utils::perpendicular_component(df, self.forward());
        let sign = if lateral.dot(self.side()) < 0.0 { 1.0 } else { -1.0 };
        self.curvature = lateral.length() * sign;
        self.smoothed_curvature = math_utils::blend_scalar_into_accumulator(
            dt * CURVATURE_SMOOTH_RATE,
            self.curvature,
            self.smoothed_curvature,
        );
        self.last_forward = self.forward();
        self.last_position = self.position();
    }

    // --- 問い合わせ ---

    /// 現在速度で直進した場合の将来位置
    pub fn predict_future_position(&self, prediction_time: f64) -> DVec3 {
        self.position() + self.velocity() * prediction_time
    }

    /// 主操舵の望む速度で直進した場合の将来位置
    pub fn predict_future_desired_position(&self, prediction_time: f64) -> DVec3 {
        self.position() + self.desired_velocity * prediction_time
    }

    /// 目標地点へのシーク・ベクトル
    ///
    /// 到着半径内ではゼロを返します。`consider_velocity`がtrueの場合は
    /// 現在速度を差し引いた値を返します。
    pub fn seek_vector(&self, target: DVec3, consider_velocity: bool) -> DVec3 {
        let difference = target - self.position();
        if difference.length_squared() <= self.squared_arrival_radius {
            return DVec3::ZERO;
        }
        if consider_velocity {
            difference - self.velocity()
        } else {
            difference
        }
    }

    /// 目標速度に近づくための前方向の操舵
    pub fn target_speed_vector(&self, target_speed: f64) -> DVec3 {
        let speed_error = target_speed - self.speed;
        self.forward() * math_utils::clip(speed_error, -self.max_force, self.max_force)
    }

    /// 他オブジェクトの外周までの距離（重なっている場合は負）
    pub fn distance_from_perimeter<D: IDetectable + ?Sized>(&self, other: &D) -> f64 {
        self.position().distance(other.position()) - self.radius - other.radius()
    }

    /// 近傍判定（自分自身は近傍に含めない）
    pub fn is_in_neighborhood<D: IDetectable + ?Sized>(
        &self,
        other: &D,
        min_distance: f64,
        max_distance: f64,
        cos_max_angle: f64,
    ) -> bool {
        if other.detectable_id() == self.id {
            return false;
        }
        crate::models::neighborhood::is_in_neighborhood(
            self.position(),
            self.forward(),
            other.position(),
            min_distance,
            max_distance,
            cos_max_angle,
        )
    }

    /// 他オブジェクトとの最接近時刻を予測（相対速度がゼロなら0）
    pub fn predict_nearest_approach_time<D: IDetectable + ?Sized>(&self, other: &D) -> f64 {
        let relative_velocity = other.velocity() - self.velocity();
        let relative_speed = relative_velocity.length();
        if relative_speed <= EPSILON {
            return 0.0;
        }
        let relative_tangent = relative_velocity / relative_speed;
        let relative_position = self.position() - other.position();
        relative_tangent.dot(relative_position) / relative_speed
    }

    /// 指定時刻における双方の位置と距離
    ///
    /// # 戻り値
    ///
    /// (最接近距離, 自分の位置, 相手の位置)
    pub fn compute_nearest_approach_positions<D: IDetectable + ?Sized>(
        &self,
        other: &D,
        time: f64,
    ) -> (f64, DVec3, DVec3) {
        let my_position = self.position() + self.velocity() * time;
        let other_position = other.position() + other.velocity() * time;
        (my_position.distance(other_position), my_position, other_position)
    }
}

impl IAgent for Vehicle {
    fn get_id(&self) -> DetectableId {
        self.id
    }

    fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}

impl IDetectable for Vehicle {
    fn detectable_id(&self) -> DetectableId {
        self.id
    }

    fn kind(&self) -> DetectableKind {
        DetectableKind::Vehicle
    }

    fn position(&self) -> DVec3 {
        self.local_space.position
    }

    fn radius(&self) -> f64 {
        self.radius
    }

    fn velocity(&self) -> DVec3 {
        Vehicle::velocity(self)
    }

    fn forward(&self) -> DVec3 {
        self.local_space.forward
    }

    fn speed(&self) -> f64 {
        self.speed
    }
}

impl IMovable for Vehicle {
    fn apply_steering_force(&mut self, force: DVec3, dt: f64) {
        self.integrate(force, dt);
    }

    fn set_position(&mut self, position: DVec3) {
        self.local_space.position = position;
        self.last_position = position;
        self.smoothed_position = position;
    }
}
