use super::*;

/// The valid-jobs map. A *new block* replaces the whole map; refreshes pile
/// up alongside the jobs they supersede so in-flight shares stay valid.
#[derive(Debug)]
pub(crate) struct Jobs {
    current: Option<Arc<Job>>,
    next_id: JobId,
    valid: HashMap<JobId, Arc<Job>>,
}

impl Jobs {
    pub(crate) fn new() -> Self {
        Self {
            current: None,
            next_id: JobId::first(),
            valid: HashMap::new(),
        }
    }

    pub(crate) fn next_id(&mut self) -> JobId {
        let id = self.next_id;
        self.next_id = self.next_id.next();
        id
    }

    pub(crate) fn get(&self, id: &JobId) -> Option<Arc<Job>> {
        self.valid.get(id).cloned()
    }

    pub(crate) fn current(&self) -> Option<Arc<Job>> {
        self.current.clone()
    }

    pub(crate) fn insert(&mut self, job: Arc<Job>) {
        self.current = Some(job.clone());
        self.valid.insert(job.job_id, job);
    }

    pub(crate) fn insert_and_clean(&mut self, job: Arc<Job>) {
        self.valid.clear();
        self.insert(job);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.valid.len()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::job::tests::sample_job};

    #[track_caller]
    fn assert_invariants(jobs: &Jobs) {
        assert_eq!(
            jobs.current.is_some(),
            !jobs.valid.is_empty(),
            "current/valid mismatch"
        );

        if let Some(current) = &jobs.current {
            assert!(jobs.valid.contains_key(&current.job_id));
        }
    }

    #[test]
    fn ids_are_monotonic_and_wrap_to_one() {
        let mut jobs = Jobs::new();

        let a = jobs.next_id();
        let b = jobs.next_id();
        assert_eq!(a, JobId::first());
        assert_ne!(a, b);

        jobs.next_id = JobId::from(u16::MAX);
        assert_eq!(jobs.next_id(), JobId::from(u16::MAX));
        assert_eq!(jobs.next_id(), JobId::first());
    }

    #[test]
    fn sixty_five_thousand_ids_without_repeats_or_zero() {
        let mut jobs = Jobs::new();
        let mut seen = HashSet::new();

        for _ in 0..u16::MAX {
            let id = jobs.next_id();
            assert_ne!(id.to_string(), "0");
            assert!(seen.insert(id), "repeated id {id}");
        }
    }

    #[test]
    fn insert_preserves_previous_jobs() {
        let mut jobs = Jobs::new();

        let id_1 = jobs.next_id();
        jobs.insert(Arc::new(sample_job(id_1)));
        assert_invariants(&jobs);

        let id_2 = jobs.next_id();
        jobs.insert(Arc::new(sample_job(id_2)));
        assert_invariants(&jobs);

        assert!(jobs.get(&id_1).is_some());
        assert!(jobs.get(&id_2).is_some());
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs.current().unwrap().job_id, id_2);
    }

    #[test]
    fn insert_and_clean_evicts_everything_else() {
        let mut jobs = Jobs::new();

        let id_1 = jobs.next_id();
        jobs.insert(Arc::new(sample_job(id_1)));

        let id_2 = jobs.next_id();
        jobs.insert_and_clean(Arc::new(sample_job(id_2)));
        assert_invariants(&jobs);

        assert!(jobs.get(&id_1).is_none(), "old job evicted");
        assert!(jobs.get(&id_2).is_some());
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn get_misses_unknown_ids() {
        let jobs = Jobs::new();
        assert!(jobs.get(&JobId::from(999)).is_none());
        assert!(jobs.current().is_none());
    }
}
