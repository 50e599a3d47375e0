pub mod color;
pub mod contour_filter;
pub mod edge_contours;
pub mod preprocess;
pub mod region_mask;
pub mod spot;
pub mod spot_intersection;
pub mod stabilizer;
