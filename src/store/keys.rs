//! Key-namespacing helpers. Every coordination key is built here so the
//! `walker:` prefix in `SPEC_FULL.md` §6 is never hand-typed at call sites.

pub fn active_tasks(dog: &str) -> String {
    format!("walker:active_tasks:{dog}")
}

pub fn cancel(task_id: &str) -> String {
    format!("walker:cancel:{task_id}")
}

pub fn thread_task(thread_ts: &str) -> String {
    format!("walker:thread_task:{thread_ts}")
}

pub fn thread_messages(thread_ts: &str) -> String {
    format!("walker:thread_messages:{thread_ts}")
}

pub fn job_queue() -> &'static str {
    "walker:jobs:pending"
}
