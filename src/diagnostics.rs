use crate::domain::Domain;
use crate::error::Error;
use std::fmt::Write;
use std::time::Instant;

/// Equal-width bin edges over the data's range. Returns `n` lower edges;
/// bin `i` covers `[edges[i], edges[i+1])` and the last bin is closed above.
pub fn create_bins(data: &[f64], n: usize) -> Vec<f64> {
    let lo = data.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    (0..n)
        .map(|i| lo + (hi - lo) * i as f64 / n as f64)
        .collect()
}

/// Histogram of the data over the given bin edges. Each value lands in the
/// last bin whose lower edge it reaches, so a degenerate (zero-width) range
/// piles everything into the final bin.
pub fn histogram(data: &[f64], bins: &[f64]) -> Vec<usize> {
    let mut hist = vec![0usize; bins.len()];
    for &v in data {
        let mut slot = 0;
        for (i, &edge) in bins.iter().enumerate() {
            if v >= edge {
                slot = i;
            }
        }
        hist[slot] += 1;
    }
    hist
}

impl Domain {
    /// Log the timestepping statistics for the current reporting interval.
    pub fn write_time(&mut self, track_speeds: bool) -> Result<(), Error> {
        let stats = self.timestepping_statistics(track_speeds, None)?;
        log::info!("{}", stats);
        Ok(())
    }

    /// Time stepping statistics as a string: model time, the timestep range
    /// since the last yield, the step count, and wall-clock seconds since
    /// the previous report. With `track_speeds`, appends a speed histogram,
    /// a decile report, and a close-up of the triangle with the largest
    /// computed speed (or of `triangle_id` when given).
    pub fn timestepping_statistics(
        &mut self,
        track_speeds: bool,
        triangle_id: Option<usize>,
    ) -> Result<String, Error> {
        let mut msg = String::new();
        let model_time = self.get_time();

        if self.recorded_min_timestep == self.recorded_max_timestep {
            write!(
                msg,
                "Time = {:.4}, delta t = {:.8}, steps={}",
                model_time, self.recorded_min_timestep, self.number_of_steps
            )
            .unwrap();
        } else if self.recorded_min_timestep > self.recorded_max_timestep {
            // No step has been recorded in this interval yet.
            write!(
                msg,
                "Time = {:.4}, steps={}",
                model_time, self.number_of_steps
            )
            .unwrap();
        } else {
            write!(
                msg,
                "Time = {:.4}, delta t in [{:.8}, {:.8}], steps={}",
                model_time,
                self.recorded_min_timestep,
                self.recorded_max_timestep,
                self.number_of_steps
            )
            .unwrap();
        }

        let now = Instant::now();
        write!(msg, " ({}s)", (now - self.last_walltime).as_secs()).unwrap();
        self.last_walltime = now;

        if track_speeds {
            msg.push('\n');
            msg.push_str("------------------------------------------------\n");

            let min_speed = self.max_speed.iter().cloned().fold(f64::INFINITY, f64::min);
            let max_speed = self
                .max_speed
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max);
            writeln!(msg, "  Speeds in [{:.6}, {:.6}]", min_speed, max_speed).unwrap();
            msg.push_str("  Histogram:\n");

            let bins = create_bins(&self.max_speed, 10);
            let hist = histogram(&self.max_speed, &bins);
            for (i, &count) in hist.iter().enumerate() {
                let lo = bins[i];
                if i + 1 < bins.len() {
                    writeln!(msg, "    [{:.6}, {:.6}[: {}", lo, bins[i + 1], count).unwrap();
                } else {
                    writeln!(msg, "    [{:.6}, {:.6}]: {}", lo, max_speed, count).unwrap();
                }
            }

            let n = self.max_speed.len();
            if n > 10 {
                msg.push_str("  Percentiles (10%):\n");
                let mut speeds = self.max_speed.clone();
                speeds.sort_by(|a, b| a.partial_cmp(b).unwrap());

                let mut k = 0;
                let mut lower = speeds[0];
                for (i, &speed) in speeds.iter().enumerate() {
                    if i % (n / 10) == 0 && i != 0 {
                        writeln!(msg, "    {} speeds in [{:.6}, {:.6}]", i - k, lower, speed)
                            .unwrap();
                        lower = speed;
                        k = i;
                    }
                }
                writeln!(
                    msg,
                    "    {} speeds in [{:.6}, {:.6}]",
                    n - k,
                    lower,
                    speeds[n - 1]
                )
                .unwrap();
            }

            let k = match triangle_id {
                Some(id) => {
                    if id >= n {
                        return Err(Error::NoSuchTriangle { id, len: n });
                    }
                    id
                }
                None => self
                    .max_speed
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                    .map(|(i, _)| i)
                    .unwrap_or(0),
            };

            let centroid = self.mesh.centroid_coordinates(true)[k];
            let radius = self.mesh.radius(k);
            let area = self.mesh.area(k);
            let speed = self.max_speed[k];

            write!(
                msg,
                "  Triangle #{} with centroid ({:.4}, {:.4}), area = {:.4} and radius = {:.4} ",
                k, centroid.x, centroid.y, area, radius
            )
            .unwrap();
            if triangle_id.is_none() {
                write!(msg, "had the largest computed speed: {:.6} ", speed).unwrap();
            } else {
                write!(msg, "had computed speed: {:.6} ", speed).unwrap();
            }
            if speed > 0.0 {
                writeln!(msg, "(timestep={:.6})", radius / speed).unwrap();
            } else {
                writeln!(msg, "(timestep={:.6})", 0.0).unwrap();
            }

            msg.push_str("    Quantity------------\n");
            for name in self.get_quantity_names() {
                let q = &self.quantities[&name];
                let v = q.vertex_values(k);
                let e = q.edge_values(k);
                let c = q.centroid_values()[k];

                writeln!(
                    msg,
                    "    {:<12}: vertex_values =  {:.4},\t {:.4},\t {:.4}",
                    name, v[0], v[1], v[2]
                )
                .unwrap();
                writeln!(
                    msg,
                    "    {:<12}: edge_values =    {:.4},\t {:.4},\t {:.4}",
                    name, e[0], e[1], e[2]
                )
                .unwrap();
                writeln!(msg, "    {:<12}: centroid_value = {:.4}", name, c).unwrap();
            }
        }

        Ok(msg)
    }

    pub fn write_boundary_statistics(
        &self,
        quantities: Option<&[&str]>,
        tags: Option<&[&str]>,
    ) -> Result<(), Error> {
        let stats = self.boundary_statistics(quantities, tags)?;
        log::info!("{}", stats);
        Ok(())
    }

    /// Range of boundary values per tag and quantity. Defaults to every
    /// evolved quantity and every tag on the mesh.
    pub fn boundary_statistics(
        &self,
        quantities: Option<&[&str]>,
        tags: Option<&[&str]>,
    ) -> Result<String, Error> {
        let quantities: Vec<String> = match quantities {
            Some(names) => names.iter().map(|s| s.to_string()).collect(),
            None => self.evolved_quantities.clone(),
        };
        let tags: Vec<String> = match tags {
            Some(tags) => tags.iter().map(|s| s.to_string()).collect(),
            None => self.mesh.boundary_tags(),
        };

        for name in &quantities {
            if !self.quantities.contains_key(name) {
                return Err(Error::UnknownQuantity {
                    name: name.clone(),
                    known: self.quantities.keys().cloned().collect(),
                });
            }
        }

        let maxwidth = quantities.iter().map(|n| n.len()).max().unwrap_or(0);

        let mut msg = format!("Boundary values at time {:.4}:\n", self.get_time());
        for tag in &tags {
            writeln!(msg, "    {}:", tag).unwrap();

            for name in &quantities {
                let q = &self.quantities[name];

                let mut minval: Option<f64> = None;
                let mut maxval: Option<f64> = None;
                for (i, ((cell, edge), _)) in self.boundary_objects.iter().enumerate() {
                    if self.mesh.boundary().get(&(*cell, *edge)) == Some(tag) {
                        let v = q.boundary_value(i);
                        minval = Some(minval.map_or(v, |m: f64| m.min(v)));
                        maxval = Some(maxval.map_or(v, |m: f64| m.max(v)));
                    }
                }

                match (minval, maxval) {
                    (Some(lo), Some(hi)) => {
                        writeln!(
                            msg,
                            "        {:<width$} in [{:12.8}, {:12.8}]",
                            name,
                            lo,
                            hi,
                            width = maxwidth
                        )
                        .unwrap();
                    }
                    _ => {
                        writeln!(
                            msg,
                            "        Sorry no information available about tag {} and quantity {}",
                            tag, name
                        )
                        .unwrap();
                    }
                }
            }
        }

        Ok(msg)
    }

    /// Statistics for the monitored quantities, for printing or logging.
    pub fn quantity_statistics(&self, precision: usize) -> String {
        let monitor = match &self.monitor {
            Some(monitor) => monitor,
            None => return "No quantities are being monitored\n".to_string(),
        };

        let mut msg = format!("Monitored quantities at time {:.4}:\n", self.get_time());

        if let Some(polygon) = &monitor.polygon {
            let p_str = format!("{:?}", polygon);
            let truncated: String = p_str.chars().take(128).collect();
            writeln!(
                msg,
                "- Restricted by polygon: {}{}",
                truncated,
                if p_str.len() > 128 { "..." } else { "" }
            )
            .unwrap();
        }

        let interval_start = match monitor.time_interval {
            Some((t0, t1)) => {
                writeln!(msg, "- Restricted by time interval: [{}, {}]", t0, t1).unwrap();
                t0
            }
            None => 0.0,
        };

        let fmt = |v: Option<f64>| match v {
            Some(v) => format!("{:.*}", precision, v),
            None => "None".to_string(),
        };
        let fmt_loc = |p: Option<crate::geometry::Point>| match p {
            Some(p) => format!("({:.*}, {:.*})", precision, p.x, precision, p.y),
            None => "None".to_string(),
        };

        for (name, info) in &monitor.blocks {
            writeln!(msg, "    {}:", name).unwrap();
            writeln!(
                msg,
                "      values since time = {:.2} in [{}, {}]",
                interval_start,
                fmt(info.min),
                fmt(info.max)
            )
            .unwrap();
            writeln!(
                msg,
                "      minimum attained at time = {}, location = {}",
                fmt(info.min_time),
                fmt_loc(info.min_location)
            )
            .unwrap();
            writeln!(
                msg,
                "      maximum attained at time = {}, location = {}",
                fmt(info.max_time),
                fmt_loc(info.max_location)
            )
            .unwrap();
        }

        msg
    }
}

#[cfg(test)]
mod test {
    use super::{create_bins, histogram};

    #[test]
    fn bins_span_the_range() {
        let data = [0.0, 1.0, 2.0, 10.0];
        let bins = create_bins(&data, 10);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins[0], 0.0);
        assert_eq!(bins[9], 9.0);
    }

    #[test]
    fn histogram_counts_every_value_once() {
        let data = [0.0, 0.5, 1.0, 5.0, 9.99, 10.0];
        let bins = create_bins(&data, 10);
        let hist = histogram(&data, &bins);
        assert_eq!(hist.iter().sum::<usize>(), data.len());
        assert_eq!(hist[0], 2); // 0.0 and 0.5
        assert_eq!(hist[1], 1); // 1.0 sits on the bin edge
        assert_eq!(hist[9], 2); // 9.99 and 10.0
    }

    #[test]
    fn degenerate_range_lands_in_the_last_bin() {
        let data = [3.0; 5];
        let bins = create_bins(&data, 10);
        let hist = histogram(&data, &bins);
        assert_eq!(hist[9], 5);
        assert_eq!(hist.iter().sum::<usize>(), 5);
    }

    #[test]
    fn isolated_peak_has_the_degenerate_signature() {
        // Many slow triangles, a single fast one: the middle bins go empty.
        let mut data = vec![1.0; 50];
        data.push(100.0);
        let bins = create_bins(&data, 10);
        let hist = histogram(&data, &bins);

        assert!(hist[hist.len() - 1] > 0);
        assert!(hist[4..9].iter().all(|&c| c == 0));
    }
}
