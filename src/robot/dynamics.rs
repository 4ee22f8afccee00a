// Wheel-encoder dead reckoning for a two-wheel differential drive
//
// The robot is tracked as two wheel contact points. Position is their midpoint
// and heading follows from the right wheel's bearing. Each update finds the
// instantaneous pivot from the two wheel velocities and rotates both points
// about it, so the wheel separation never changes.
//
// Robot frame: x forward, y left. The left wheel sits at (0, +R), the right
// wheel at (0, -R).

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::sensors::{LEFT_ENCODER, RIGHT_ENCODER, SensorFrame};

/// Half the distance between the wheels
pub const WHEEL_TRACK_RADIUS: f64 = 115.490625;
/// Encoder ticks to distance
pub const ENCODER_RATIO: f64 = 0.55287243514;

const ENCODER_MODULUS: i32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn midpoint(self, other: Point2) -> Point2 {
        Point2::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn distance(self, other: Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Rotate counter-clockwise about `pivot`
    pub fn rotate_about(self, pivot: Point2, angle: f64) -> Point2 {
        let (sin, cos) = angle.sin_cos();
        let dx = self.x - pivot.x;
        let dy = self.y - pivot.y;
        Point2::new(pivot.x + dx * cos - dy * sin, pivot.y + dx * sin + dy * cos)
    }

    fn offset(self, dx: f64, dy: f64) -> Point2 {
        Point2::new(self.x + dx, self.y + dy)
    }
}

/// Planar pose snapshot; theta in radians, counter-clockwise from +x
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// Raw wheel encoder counters, each wrapping at 65536
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EncoderSample {
    pub left: u16,
    pub right: u16,
}

impl EncoderSample {
    pub fn new(left: u16, right: u16) -> Self {
        Self { left, right }
    }

    /// Pull both encoder readings out of a frame, if present
    pub fn from_frame(frame: &SensorFrame) -> Option<Self> {
        let left = frame.get(LEFT_ENCODER.name)?.as_u16()?;
        let right = frame.get(RIGHT_ENCODER.name)?.as_u16()?;
        Some(Self { left, right })
    }
}

/// Tick difference between two raw readings
///
/// A prior reading above the new one is taken as a forward wrap through 65535.
/// A large backward step looks the same and is misread.
pub fn raw_delta(prior: u16, current: u16) -> i32 {
    let mut prior = prior as i32;
    let current = current as i32;
    if prior > current {
        prior -= ENCODER_MODULUS;
    }
    current - prior
}

/// Signed tick difference for a wheel whose commanded direction is known
///
/// The counter is taken to have moved the shorter way round; the command
/// gives the sign. An idle wheel keeps the shorter way's own sign.
pub fn directed_delta(prior: u16, current: u16, commanded: i16) -> i32 {
    let ahead = raw_delta(prior, current);
    let behind = raw_delta(current, prior);
    match commanded.signum() {
        1 => ahead.min(behind),
        -1 => -ahead.min(behind),
        _ if ahead <= behind => ahead,
        _ => -behind,
    }
}

/// Ticks-to-distance ratio from a spin in place of `turns` full turns
///
/// Each wheel then travels `turns` circles of the track radius. The wheel
/// with more ticks is used; no ticks gives no ratio.
pub fn calibrated_ratio(radius: f64, turns: f64, left_ticks: i64, right_ticks: i64) -> Option<f64> {
    let ticks = left_ticks.unsigned_abs().max(right_ticks.unsigned_abs());
    if ticks == 0 {
        return None;
    }
    Some(turns * 2.0 * std::f64::consts::PI * radius / ticks as f64)
}

/// The two tracked wheel contact points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelPoints {
    pub left: Point2,
    pub right: Point2,
}

impl WheelPoints {
    fn at_origin(radius: f64) -> Self {
        Self {
            left: Point2::new(0.0, radius),
            right: Point2::new(0.0, -radius),
        }
    }

    pub fn center(&self) -> Point2 {
        self.left.midpoint(self.right)
    }

    pub fn separation(&self) -> f64 {
        self.left.distance(self.right)
    }
}

/// Pivot-based rigid body model driven by encoder deltas
#[derive(Debug, Clone)]
pub struct DynamicsModel {
    wheels: WheelPoints,
    prior: EncoderSample,
    radius: f64,
    encoder_ratio: f64,
}

impl Default for DynamicsModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicsModel {
    pub fn new() -> Self {
        Self::with_constants(WHEEL_TRACK_RADIUS, ENCODER_RATIO)
    }

    pub fn with_constants(radius: f64, encoder_ratio: f64) -> Self {
        debug!(
            "Dynamics model: track radius {:.3}, encoder ratio {:.6}",
            radius, encoder_ratio
        );
        Self {
            wheels: WheelPoints::at_origin(radius),
            prior: EncoderSample::default(),
            radius,
            encoder_ratio,
        }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn encoder_ratio(&self) -> f64 {
        self.encoder_ratio
    }

    /// Replace the ticks-to-distance ratio, e.g. after a calibration run
    pub fn set_encoder_ratio(&mut self, ratio: f64) {
        debug!("Encoder ratio {:.6} -> {:.6}", self.encoder_ratio, ratio);
        self.encoder_ratio = ratio;
    }

    /// Tick deltas since the previous sample, signed by the commanded wheel
    /// directions (mm/s, sign only). The stored prior is replaced by `sample`.
    pub fn directed_ticks(&mut self, sample: EncoderSample, left_cmd: i16, right_cmd: i16) -> (i32, i32) {
        let prior = std::mem::replace(&mut self.prior, sample);
        (
            directed_delta(prior.left, sample.left, left_cmd),
            directed_delta(prior.right, sample.right, right_cmd),
        )
    }

    /// Integrate per-wheel tick deltas over `elapsed` seconds
    pub fn update_ticks(&mut self, left: i32, right: i32, elapsed: f64) {
        self.update(
            left as f64 * self.encoder_ratio,
            right as f64 * self.encoder_ratio,
            elapsed,
        );
    }

    /// Convert a raw sample into per-wheel distances since the previous sample
    ///
    /// The stored prior is replaced by `sample` every time.
    pub fn normalize(&mut self, sample: EncoderSample) -> (f64, f64) {
        let prior = std::mem::replace(&mut self.prior, sample);
        let left = raw_delta(prior.left, sample.left) as f64 * self.encoder_ratio;
        let right = raw_delta(prior.right, sample.right) as f64 * self.encoder_ratio;
        (left, right)
    }

    /// Seed the prior sample without producing motion
    pub fn initialize_priors(&mut self, sample: EncoderSample) {
        self.normalize(sample);
    }

    /// Advance the pose by per-wheel distances travelled over `elapsed` seconds
    pub fn update(&mut self, delta_left: f64, delta_right: f64, elapsed: f64) {
        if !(elapsed > 0.0 && elapsed.is_finite()) {
            warn!("Ignoring odometry update with elapsed time {}", elapsed);
            return;
        }

        if delta_left == delta_right {
            // Straight line; the pivot would sit at infinity
            let heading = self.heading();
            let dx = delta_left * heading.cos();
            let dy = delta_left * heading.sin();
            self.wheels.left = self.wheels.left.offset(dx, dy);
            self.wheels.right = self.wheels.right.offset(dx, dy);
            return;
        }

        let v_left = delta_left / elapsed;
        let v_right = delta_right / elapsed;
        let r = self.radius;

        // Wheel speed is linear along the axis; the pivot is where it crosses zero
        let slope = (v_left - v_right) / (2.0 * r);
        let pivot_y = -v_right / slope - r;

        // Signed offset from each wheel to the pivot. The wheel further from the
        // pivot gives the better conditioned angular velocity.
        let left_off = pivot_y - r;
        let right_off = pivot_y + r;
        let omega = if right_off.abs() > left_off.abs() {
            v_right / right_off
        } else {
            v_left / left_off
        };
        let d_theta = omega * elapsed;

        let center = self.wheels.center();
        let heading = self.heading();
        let pivot = Point2::new(0.0, pivot_y)
            .rotate_about(Point2::default(), heading)
            .offset(center.x, center.y);

        self.wheels.left = self.wheels.left.rotate_about(pivot, d_theta);
        self.wheels.right = self.wheels.right.rotate_about(pivot, d_theta);
    }

    /// Normalize a sample and integrate it in one step
    pub fn advance(&mut self, sample: EncoderSample, elapsed: f64) -> Pose {
        let (left, right) = self.normalize(sample);
        self.update(left, right, elapsed);
        self.pose()
    }

    pub fn position(&self) -> Point2 {
        self.wheels.center()
    }

    /// Heading from the right wheel's bearing, a quarter turn behind forward
    pub fn heading(&self) -> f64 {
        let center = self.wheels.center();
        let dx = self.wheels.right.x - center.x;
        let dy = self.wheels.right.y - center.y;
        dx.atan2(-dy)
    }

    pub fn pose(&self) -> Pose {
        let position = self.position();
        Pose {
            x: position.x,
            y: position.y,
            theta: self.heading(),
        }
    }

    pub fn wheels(&self) -> WheelPoints {
        self.wheels
    }

    /// Back to the origin, heading zero. The prior encoder sample is kept.
    pub fn reset(&mut self) {
        self.wheels = WheelPoints::at_origin(self.radius);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::sensors::SensorValue;
    use std::f64::consts::PI;

    const EPS: f64 = 1e-9;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_reset_pose() {
        let mut model = DynamicsModel::new();
        model.update(10.0, 30.0, 0.1);
        model.reset();
        assert_eq!(model.pose(), Pose::default());
        assert_close(model.wheels().separation(), 2.0 * WHEEL_TRACK_RADIUS);
    }

    #[test]
    fn test_zero_deltas_leave_pose_unchanged() {
        let mut model = DynamicsModel::new();
        model.update(0.0, 0.0, 0.015);
        assert_eq!(model.pose(), Pose::default());
    }

    #[test]
    fn test_equal_deltas_translate_along_heading() {
        let mut model = DynamicsModel::new();
        let (left, right) = model.normalize(EncoderSample::new(100, 100));
        model.update(left, right, 0.015);
        let pose = model.pose();
        assert_close(pose.x, 100.0 * ENCODER_RATIO);
        assert_close(pose.y, 0.0);
        assert_close(pose.theta, 0.0);

        // turn a quarter, then drive straight again: motion follows the new heading
        model.reset();
        let quarter = PI / 2.0 * WHEEL_TRACK_RADIUS;
        model.update(-quarter, quarter, 1.0);
        assert_close(model.heading(), PI / 2.0);
        model.update(50.0, 50.0, 1.0);
        let pose = model.pose();
        assert_close(pose.x, 0.0);
        assert_close(pose.y, 50.0);
        assert_close(pose.theta, PI / 2.0);
    }

    #[test]
    fn test_spin_in_place() {
        let mut model = DynamicsModel::new();
        let d = 20.0;
        model.update(-d, d, 0.5);
        let pose = model.pose();
        assert_close(pose.x, 0.0);
        assert_close(pose.y, 0.0);
        assert_close(pose.theta, d / WHEEL_TRACK_RADIUS);
    }

    #[test]
    fn test_pivot_on_stationary_wheel() {
        let mut model = DynamicsModel::new();
        let right_before = model.wheels().right;
        // right wheel still, left wheel forward: clockwise about the right wheel
        model.update(30.0, 0.0, 0.2);
        let wheels = model.wheels();
        assert!((wheels.right.x - right_before.x).abs() < EPS);
        assert!((wheels.right.y - right_before.y).abs() < EPS);
        assert_close(model.heading(), -30.0 / (2.0 * WHEEL_TRACK_RADIUS));
        assert!(model.pose().x > 0.0);
    }

    #[test]
    fn test_arc_matches_closed_form() {
        let mut model = DynamicsModel::new();
        let r = WHEEL_TRACK_RADIUS;
        let (dl, dr) = (40.0, 60.0);
        model.update(dl, dr, 0.1);

        // Arc of the center: angle (dr - dl) / 2r, radius (dl + dr) / 2 / angle
        let theta = (dr - dl) / (2.0 * r);
        let arc_radius = (dl + dr) / 2.0 / theta;
        let pose = model.pose();
        assert_close(pose.theta, theta);
        assert_close(pose.x, arc_radius * theta.sin());
        assert_close(pose.y, arc_radius * (1.0 - theta.cos()));
    }

    #[test]
    fn test_separation_is_preserved() {
        let mut model = DynamicsModel::new();
        let steps = [(5.0, 9.0), (-3.0, 12.0), (7.0, 7.0), (20.0, -1.0), (0.0, 4.0), (-6.0, -2.0)];
        for _ in 0..50 {
            for &(l, r) in &steps {
                model.update(l, r, 0.015);
            }
        }
        assert!((model.wheels().separation() - 2.0 * WHEEL_TRACK_RADIUS).abs() < 1e-6);
    }

    #[test]
    fn test_non_positive_elapsed_is_ignored() {
        let mut model = DynamicsModel::new();
        model.update(10.0, 20.0, 0.0);
        model.update(10.0, 20.0, -1.0);
        model.update(10.0, 20.0, f64::NAN);
        assert_eq!(model.pose(), Pose::default());
    }

    #[test]
    fn test_encoder_rollover() {
        assert_eq!(raw_delta(65500, 10), 46);
        assert_eq!(raw_delta(10, 65500), 65490);
        assert_eq!(raw_delta(1000, 1000), 0);

        let mut model = DynamicsModel::new();
        model.initialize_priors(EncoderSample::new(65500, 65535));
        let (left, right) = model.normalize(EncoderSample::new(10, 0));
        assert_close(left, 46.0 * ENCODER_RATIO);
        assert_close(right, 1.0 * ENCODER_RATIO);
    }

    #[test]
    fn test_normalize_always_updates_prior() {
        let mut model = DynamicsModel::new();
        model.normalize(EncoderSample::new(500, 700));
        let (left, right) = model.normalize(EncoderSample::new(500, 700));
        assert_eq!((left, right), (0.0, 0.0));
    }

    #[test]
    fn test_sample_from_frame() {
        let mut frame = SensorFrame::new();
        frame.push("left_encoder", SensorValue::U16(12));
        assert_eq!(EncoderSample::from_frame(&frame), None);
        frame.push("right_encoder", SensorValue::U16(34));
        assert_eq!(EncoderSample::from_frame(&frame), Some(EncoderSample::new(12, 34)));
    }

    #[test]
    fn test_advance_uses_deltas() {
        let mut model = DynamicsModel::new();
        model.initialize_priors(EncoderSample::new(1000, 1000));
        let pose = model.advance(EncoderSample::new(1100, 1100), 0.015);
        assert_close(pose.x, 100.0 * ENCODER_RATIO);
    }

    #[test]
    fn test_directed_delta_follows_command() {
        // counter stepping back while reversing
        assert_eq!(directed_delta(1000, 990, -100), -10);
        assert_eq!(directed_delta(5, 65530, -100), -11);
        // forward wrap
        assert_eq!(directed_delta(65530, 4, 100), 10);
        // counter that only counts up, wheel reversed
        assert_eq!(directed_delta(1000, 1010, -100), -10);
        // idle wheel coasting back a little
        assert_eq!(directed_delta(1000, 997, 0), -3);
        assert_eq!(directed_delta(1000, 1000, 0), 0);
    }

    #[test]
    fn test_directed_ticks_spin_in_place() {
        let mut model = DynamicsModel::new();
        model.initialize_priors(EncoderSample::new(1000, 1000));
        for step in 1..=5u16 {
            let sample = EncoderSample::new(1000 - 10 * step, 1000 + 10 * step);
            let (left, right) = model.directed_ticks(sample, -100, 100);
            assert_eq!((left, right), (-10, 10));
            model.update_ticks(left, right, 0.02);
        }
        let pose = model.pose();
        assert!(pose.x.abs() < EPS && pose.y.abs() < EPS);
        assert_close(pose.theta, 50.0 * ENCODER_RATIO / WHEEL_TRACK_RADIUS);
    }

    #[test]
    fn test_calibrated_ratio() {
        let model = DynamicsModel::new();
        let circumference = 10.0 * 2.0 * PI * model.radius();
        let ticks = (circumference / model.encoder_ratio()).round() as i64;
        let ratio = calibrated_ratio(model.radius(), 10.0, -ticks, ticks - 3).unwrap();
        assert!((ratio - ENCODER_RATIO).abs() < 1e-4);
        assert_eq!(calibrated_ratio(model.radius(), 10.0, 0, 0), None);
    }

    #[test]
    fn test_set_encoder_ratio_scales_motion() {
        let mut model = DynamicsModel::new();
        model.set_encoder_ratio(2.0);
        assert_eq!(model.encoder_ratio(), 2.0);
        model.update_ticks(10, 10, 0.1);
        assert_close(model.pose().x, 20.0);
    }
}
