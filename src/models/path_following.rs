use std::sync::Arc;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::models::{pathway::Pathway, traits::IPathway, vehicle::Vehicle};

/// 経路をたどる向き
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowDirection {
    #[default]
    Forward,
    Back,
}

impl FollowDirection {
    pub fn sign(&self) -> f64 {
        match self {
            FollowDirection::Forward => 1.0,
            FollowDirection::Back => -1.0,
        }
    }
}

/// 目標点の再探索で到着半径に乗じる係数
const ARRIVAL_RADIUS_EXTENSION: f64 = 1.5;

/// 簡易経路追従
///
/// 現在の経路上の距離から`予測時間 × 速度`だけ先の点をシークします。
#[derive(Debug, Clone)]
pub struct PathFollower {
    pub pathway: Arc<Pathway>,
    pub pathway_name: String,
    /// 予測時間（秒）
    pub prediction_time: f64,
    /// 予測に使う最低速度
    pub min_speed_to_consider: f64,
    distance_along_path: f64,
}

impl PathFollower {
    pub fn new(pathway: Arc<Pathway>, pathway_name: String) -> Self {
        Self {
            pathway,
            pathway_name,
            prediction_time: 1.5,
            min_speed_to_consider: 0.25,
            distance_along_path: 0.0,
        }
    }

    /// 直近に計算した経路上の距離
    pub fn distance_along_path(&self) -> f64 {
        self.distance_along_path
    }

    /// 経路の走破率（0..=1）
    pub fn path_percent_traversed(&self) -> f64 {
        let total = self.pathway.total_path_length();
        if total > 0.0 { self.distance_along_path / total } else { 0.0 }
    }

    pub fn compute(&mut self, vehicle: &Vehicle) -> DVec3 {
        // 停止中でも経路上を前進できるよう、低速時は下限速度に予測時間を加えた値で予測する
        let speed = if vehicle.speed() > self.min_speed_to_consider {
            vehicle.speed()
        } else {
            self.min_speed_to_consider + self.prediction_time.max(0.0)
        };
        let path_distance_offset = self.prediction_time.max(0.0) * speed;

        self.distance_along_path = self.pathway.map_point_to_path_distance(vehicle.position());
        let target_path_distance = self.distance_along_path + path_distance_offset;
        let target = self.pathway.map_path_distance_to_point(target_path_distance);
        let seek = vehicle.seek_vector(target, false);

        if seek == DVec3::ZERO && target_path_distance <= self.pathway.total_path_length() {
            // 曲がり角付近で目標点が到着半径に入った場合は少し先を狙う
            let extended = self.pathway.map_path_distance_to_point(
                target_path_distance + ARRIVAL_RADIUS_EXTENSION * vehicle.arrival_radius(),
            );
            return vehicle.seek_vector(extended, false);
        }
        seek
    }
}

/// 予測型経路追従
///
/// 予測位置がチューブ内かつ正しい向きに進んでいる場合は操舵しません。
#[derive(Debug, Clone)]
pub struct PredictivePathFollower {
    pub pathway: Arc<Pathway>,
    pub pathway_name: String,
    pub direction: FollowDirection,
    /// 予測時間（秒）
    pub prediction_time: f64,
}

impl PredictivePathFollower {
    pub fn new(pathway: Arc<Pathway>, pathway_name: String) -> Self {
        Self {
            pathway,
            pathway_name,
            direction: FollowDirection::Forward,
            prediction_time: 2.0,
        }
    }

    pub fn compute(&self, vehicle: &Vehicle) -> DVec3 {
        let path_distance_offset = self.direction.sign() * self.prediction_time * vehicle.speed();
        let future_position = vehicle.predict_future_position(self.prediction_time);

        let now_path_distance = self.pathway.map_point_to_path_distance(vehicle.position());
        let future_path_distance = self.pathway.map_point_to_path_distance(future_position);
        let rightway = if path_distance_offset > 0.0 {
            now_path_distance < future_path_distance
        } else {
            now_path_distance > future_path_distance
        };

        let (_, relative) = self.pathway.map_point_to_path(future_position);
        if relative.outside < 0.0 && rightway {
            return DVec3::ZERO;
        }

        let target = self
            .pathway
            .map_path_distance_to_point(now_path_distance + path_distance_offset);
        vehicle.seek_vector(target, false)
    }
}
