mod profile;

pub use profile::{
    EngagementHours, MoodBaseline, PersonaProfile, ProfileProvider, StaticProfileProvider,
};
