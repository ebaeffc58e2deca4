use tracing::debug;

use crate::{
    loader::{AnimatedSubject, LoadTicket},
    scene::{NodeKind, Scene},
};

/// Tracks the current subject, the in-flight load and the loading flag.
///
/// Every swap bumps a generation counter. Only the completion of the most
/// recent request is accepted, so a superseded load can never re-attach a
/// stale subject.
#[derive(Debug, Default)]
pub struct SwapController {
    generation: u64,
    loading: bool,
    selected: Option<String>,
    current: Option<AnimatedSubject>,
    in_flight: Option<LoadTicket>,
}

impl SwapController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn current(&self) -> Option<&AnimatedSubject> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut AnimatedSubject> {
        self.current.as_mut()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn in_flight(&self) -> Option<&LoadTicket> {
        self.in_flight.as_ref()
    }

    /// Marks the selection as loading, cancels any in-flight request and fully
    /// disposes the current subject before handing out the ticket for the new load.
    pub fn begin(&mut self, scene: &mut Scene, path: &str) -> LoadTicket {
        self.loading = true;
        self.selected = Some(path.to_string());

        if let Some(previous) = self.in_flight.take() {
            debug!(generation = previous.generation(), "cancelling superseded load");
            previous.cancel();
        }
        self.dispose_current(scene);

        self.generation += 1;
        let ticket = LoadTicket::new(self.generation);
        self.in_flight = Some(ticket.clone());
        ticket
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation() == ticket.generation())
    }

    /// Closes the request if it is still current and clears the loading flag.
    /// Returns `false` for stale tickets, which leave all state untouched.
    pub fn settle(&mut self, ticket: &LoadTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.in_flight = None;
        self.loading = false;
        true
    }

    /// Makes `subject` current. Anything still attached is disposed first.
    pub fn install(&mut self, scene: &mut Scene, subject: AnimatedSubject) {
        self.dispose_current(scene);
        self.current = Some(subject);
    }

    pub fn dispose_current(&mut self, scene: &mut Scene) -> bool {
        match self.current.take() {
            Some(subject) => {
                debug!(dataset = %subject.dataset, "disposing animated subject");
                dispose_subject(scene, subject);
                true
            }
            None => false,
        }
    }

    /// Drops the in-flight request without settling it, e.g. on teardown.
    pub fn abandon(&mut self) {
        if let Some(ticket) = self.in_flight.take() {
            ticket.cancel();
        }
        self.loading = false;
    }
}

/// Stops and uncaches the player, releases the helper's geometry and every
/// material, then removes the helper and the bone group from the scene.
pub fn dispose_subject(scene: &mut Scene, subject: AnimatedSubject) {
    let AnimatedSubject {
        mut mixer,
        helper,
        group,
        ..
    } = subject;

    mixer.stop_all_action();
    mixer.uncache_root(mixer.root());

    let resources = scene.node(helper).and_then(|node| match &node.kind {
        NodeKind::SkeletonHelper(helper) => Some((helper.geometry, helper.materials.clone())),
        _ => None,
    });
    if let Some((geometry, materials)) = resources {
        scene.dispose_geometry(geometry);
        for material in materials {
            scene.dispose_material(material);
        }
    }

    scene.despawn(helper);
    scene.despawn(group);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec3;

    use super::*;
    use crate::{
        bvh::BvhDocument,
        camera::{OrbitControls, PerspectiveCamera},
        loader::{attach_subject, LoadedMotion},
    };

    const BVH: &str = "HIERARCHY\nROOT Hips\n{\nOFFSET 0 0 0\nCHANNELS 1 Yrotation\n\
                       JOINT Head\n{\nOFFSET 0 10 0\n}\n}\nMOTION\nFrames: 1\nFrame Time: 0.1\n0\n";

    fn subject(scene: &mut Scene, generation: u64) -> AnimatedSubject {
        let document = BvhDocument::parse(BVH).unwrap();
        let clip = Arc::new(document.to_clip("pose"));
        let mut camera = PerspectiveCamera::new(50.0, 1.0, 0.1, 100.0);
        camera.position = Vec3::new(0.0, 0.0, 50.0);
        let mut controls = OrbitControls::new(Vec3::ZERO);
        attach_subject(
            scene,
            &mut controls,
            &mut camera,
            "pose.bvh",
            generation,
            LoadedMotion { document, clip },
        )
        .unwrap()
    }

    #[test]
    fn begin_disposes_current_subject_and_releases_resources() {
        let mut scene = Scene::default();
        let mut swap = SwapController::new();

        let ticket = swap.begin(&mut scene, "pose.bvh");
        let attached = subject(&mut scene, ticket.generation());
        assert!(swap.settle(&ticket));
        swap.install(&mut scene, attached);
        assert_eq!(scene.live_geometries(), 1);

        swap.begin(&mut scene, "pose.bvh");
        assert!(swap.current().is_none());
        assert!(swap.is_loading());
        assert_eq!(scene.node_count(), 0);
        assert_eq!(scene.live_geometries(), 0);
        assert_eq!(scene.live_materials(), 0);
    }

    #[test]
    fn begin_with_nothing_attached_just_starts_loading() {
        let mut scene = Scene::default();
        let mut swap = SwapController::new();

        assert!(!swap.dispose_current(&mut scene));
        let ticket = swap.begin(&mut scene, "a.bvh");
        assert_eq!(ticket.generation(), 1);
        assert_eq!(swap.selected(), Some("a.bvh"));
        assert!(swap.is_loading());
    }

    #[test]
    fn superseded_ticket_is_cancelled_and_rejected() {
        let mut scene = Scene::default();
        let mut swap = SwapController::new();

        let first = swap.begin(&mut scene, "a.bvh");
        let second = swap.begin(&mut scene, "b.bvh");

        assert!(first.is_cancelled());
        assert!(!swap.settle(&first));
        assert!(swap.is_loading(), "a stale completion leaves the flag alone");
        assert!(swap.settle(&second));
        assert!(!swap.is_loading());
        assert!(!swap.settle(&second), "a ticket settles once");
    }

    #[test]
    fn abandon_cancels_in_flight_load() {
        let mut scene = Scene::default();
        let mut swap = SwapController::new();
        let ticket = swap.begin(&mut scene, "a.bvh");

        swap.abandon();
        assert!(ticket.is_cancelled());
        assert!(!swap.is_loading());
        assert!(swap.in_flight().is_none());
    }
}
