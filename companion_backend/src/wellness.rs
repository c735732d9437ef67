use rand::seq::IndexedRandom;

pub const MOTIVATIONAL_QUOTES: &[&str] = &[
    "Stay focused! Every small step brings you closer to success. 💪",
    "You’re capable of amazing things—keep pushing forward!",
    "Don’t let stress take over! Take breaks, breathe, and keep going. 🚀",
];

const CAMPUS_RESOURCES: &[(&str, &str)] = &[
    (
        "Centennial College",
        "Visit the Student Wellness Centre: https://www.centennialcollege.ca/student-health",
    ),
    (
        "University of Toronto",
        "Check U of T’s mental health services: https://mentalhealth.utoronto.ca/",
    ),
];

pub fn daily_motivation() -> &'static str {
    MOTIVATIONAL_QUOTES
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(MOTIVATIONAL_QUOTES[0])
}

/// Wellness service pointer for a known institution, matched case-insensitively.
pub fn campus_resource(university: &str) -> Option<&'static str> {
    let wanted = university.trim();
    CAMPUS_RESOURCES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
        .map(|(_, resource)| *resource)
}
