/// Fixed-size group × track membership table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTable {
    num_groups: usize,
    num_tracks: usize,
    members: Vec<bool>,
}

impl GroupTable {
    pub fn new(num_groups: usize, num_tracks: usize) -> Self {
        Self {
            num_groups,
            num_tracks,
            members: vec![false; num_groups * num_tracks],
        }
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn num_tracks(&self) -> usize {
        self.num_tracks
    }

    fn slot(&self, group: usize, track: usize) -> Option<usize> {
        (group < self.num_groups && track < self.num_tracks)
            .then(|| group * self.num_tracks + track)
    }

    pub fn contains(&self, group: usize, track: usize) -> bool {
        self.slot(group, track)
            .map(|slot| self.members[slot])
            .unwrap_or(false)
    }

    /// Returns `true` if the membership was added.
    pub fn add(&mut self, group: usize, track: usize) -> bool {
        match self.slot(group, track) {
            Some(slot) if !self.members[slot] => {
                self.members[slot] = true;
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if the membership existed.
    pub fn remove(&mut self, group: usize, track: usize) -> bool {
        match self.slot(group, track) {
            Some(slot) if self.members[slot] => {
                self.members[slot] = false;
                true
            }
            _ => false,
        }
    }

    pub fn members(&self, group: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_tracks).filter(move |&track| self.contains(group, track))
    }

    pub fn groups_of(&self, track: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_groups).filter(move |&group| self.contains(group, track))
    }

    pub fn clear(&mut self) {
        self.members.fill(false);
    }
}
