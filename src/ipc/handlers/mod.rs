pub mod academic_years;
pub mod announcements;
pub mod attendance;
pub mod classrooms;
pub mod core;
pub mod fees;
pub mod grades;
pub mod notifications;
pub mod schedules;
pub mod students;
pub mod subjects;
pub mod teachers;
