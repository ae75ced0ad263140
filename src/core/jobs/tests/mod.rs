mod approval;
mod queue;
